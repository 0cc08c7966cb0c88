//! Object storage for input datasets and transformed artifacts.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::dataset::DatasetFormat;
use crate::error::{EngineError, Result};

/// Location of a dataset object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub bucket: String,
    pub key: String,
}

impl DatasetRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// File name of the key without directories or extension.
    pub fn base_name(&self) -> &str {
        let file = self.key.rsplit('/').next().unwrap_or(&self.key);
        match file.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file,
        }
    }

    /// Format implied by the key's extension.
    pub fn format(&self) -> Result<DatasetFormat> {
        DatasetFormat::from_key(&self.key)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Byte-level object storage.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. A missing object is [`EngineError::ObjectNotFound`].
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Store an object, replacing any previous content.
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()>;
}

// =============================================================================
// Local filesystem
// =============================================================================

/// Objects stored as `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let storage_error = |reason: &str| EngineError::Storage {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if bucket.is_empty() || key.is_empty() {
            return Err(storage_error("bucket and key must not be empty"));
        }
        let relative = Path::new(bucket).join(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(storage_error("path escapes the storage root"));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(bucket, key)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EngineError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            _ => EngineError::Storage {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            },
        })
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(bucket, key)?;
        let storage_error = |e: std::io::Error| EngineError::Storage {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage_error)?;
        }
        std::fs::write(&path, bytes).map_err(storage_error)
    }
}

// =============================================================================
// In memory
// =============================================================================

/// Process-local store, mainly for tests.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .read()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    static_assertions::assert_impl_all!(LocalObjectStore: Send, Sync);
    static_assertions::assert_impl_all!(InMemoryObjectStore: Send, Sync);

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lex-transform-{}-{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_dataset_ref_names() {
        let r = DatasetRef::new("uploads", "2024/sales.data.csv");
        assert_eq!(r.base_name(), "sales.data");
        assert_eq!(r.format().unwrap(), DatasetFormat::Csv);
        assert_eq!(r.to_string(), "uploads/2024/sales.data.csv");
        assert_eq!(DatasetRef::new("b", "README").base_name(), "README");
    }

    #[test]
    fn test_in_memory_round_trip_and_not_found() {
        let store = InMemoryObjectStore::new();
        store.put("b", "k.csv", b"a\n1\n").unwrap();

        assert_eq!(store.get("b", "k.csv").unwrap(), b"a\n1\n".to_vec());
        assert!(store.contains("b", "k.csv"));
        assert_eq!(store.get("b", "other.csv").unwrap_err().error_code(), "OBJECT_NOT_FOUND");
    }

    #[test]
    fn test_local_store_writes_under_bucket() {
        let root = temp_root("local");
        let store = LocalObjectStore::new(&root);

        store.put("cleaned-data", "nested/out.csv", b"x\n").unwrap();

        assert!(root.join("cleaned-data").join("nested").join("out.csv").exists());
        assert_eq!(store.get("cleaned-data", "nested/out.csv").unwrap(), b"x\n".to_vec());
        assert_eq!(
            store.get("cleaned-data", "missing.csv").unwrap_err().error_code(),
            "OBJECT_NOT_FOUND"
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_local_store_rejects_escaping_keys() {
        let store = LocalObjectStore::new(temp_root("escape"));
        let err = store.put("uploads", "../secret.csv", b"").unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
    }
}
