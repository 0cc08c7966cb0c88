//! Pipeline run manifests.
//!
//! A manifest is a JSON document that follows one dataset through the
//! ingestion, preprocessing, feature engineering, training and prediction
//! stages. It lives at `pipeline-runs/<run_id>/run.json` in the manifest
//! bucket.
//!
//! Patches merge shallowly. The `stages` object is the exception: each
//! patched stage is merged into the stored one, and stages the patch does
//! not name are left alone.
//!
//! # Example
//!
//! ```rust,ignore
//! let manifests = ManifestStore::new(store, "training-results");
//! let run = manifests.create(None, Some("people.csv".into()), None)?;
//! manifests.patch(run.run_id, json!({
//!     "status": "running",
//!     "stages": {"preprocessing": {"status": "completed"}}
//! }))?;
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::storage::ObjectStore;
use crate::tracker::JobStatus;

const RUNS_PREFIX: &str = "pipeline-runs";

/// Stages every new manifest starts with, in pipeline order.
pub const STAGES: [&str; 5] = [
    "ingestion",
    "preprocessing",
    "feature_engineering",
    "training",
    "prediction",
];

/// Stages that also record model metrics.
const METRIC_STAGES: [&str; 2] = ["training", "prediction"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub title: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_filename: Option<String>,
    /// Free-form per-stage records keyed by stage name
    pub stages: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Top-level keys added by patches
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunManifest {
    fn new(title: Option<String>, source_filename: Option<String>, metadata: Map<String, Value>) -> Self {
        let run_id = Uuid::new_v4();
        let now = Utc::now();
        let stages = STAGES
            .iter()
            .map(|stage| {
                let mut record = Map::new();
                record.insert("status".to_string(), json!("pending"));
                record.insert("artifacts".to_string(), json!([]));
                record.insert("started_at".to_string(), Value::Null);
                record.insert("completed_at".to_string(), Value::Null);
                if METRIC_STAGES.contains(stage) {
                    record.insert("metrics".to_string(), json!({}));
                }
                (stage.to_string(), record)
            })
            .collect();

        Self {
            run_id,
            title: title.unwrap_or_else(|| format!("Pipeline Run {}", &run_id.to_string()[..8])),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            source_filename,
            stages,
            metadata,
            extra: Map::new(),
        }
    }

    /// The `status` recorded for a stage.
    pub fn stage_status(&self, stage: &str) -> Option<&str> {
        self.stages.get(stage)?.get("status")?.as_str()
    }
}

/// Object key of a run's manifest.
pub fn manifest_key(run_id: Uuid) -> String {
    format!("{}/{}/run.json", RUNS_PREFIX, run_id)
}

/// Reads and writes run manifests in one bucket.
pub struct ManifestStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    // Held across the read-modify-write of a patch.
    lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create and store a manifest with every stage pending.
    ///
    /// Without a title the run is named `Pipeline Run <first 8 id chars>`.
    pub fn create(
        &self,
        title: Option<String>,
        source_filename: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<RunManifest> {
        let manifest = RunManifest::new(title, source_filename, metadata.unwrap_or_default());
        self.write(&manifest)?;
        info!("Created pipeline run {}", manifest.run_id);
        Ok(manifest)
    }

    /// Load a manifest. An unknown run is [`EngineError::ObjectNotFound`].
    pub fn get(&self, run_id: Uuid) -> Result<RunManifest> {
        let bytes = self.store.get(&self.bucket, &manifest_key(run_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Merge `patch` into a stored manifest and refresh `updated_at`.
    ///
    /// `patch` must be an object. Non-object stage entries are skipped. A
    /// patch that would change `run_id` or leave the manifest malformed is
    /// rejected and nothing is written.
    pub fn patch(&self, run_id: Uuid, patch: Value) -> Result<RunManifest> {
        let Value::Object(mut patch) = patch else {
            return Err(EngineError::InvalidConfig(
                "manifest patch must be a JSON object".to_string(),
            ));
        };
        if let Some(id) = patch.get("run_id") {
            if id.as_str() != Some(run_id.to_string().as_str()) {
                return Err(EngineError::InvalidConfig(
                    "run_id cannot be changed".to_string(),
                ));
            }
        }

        let _guard = self.lock.lock();
        let current = self.get(run_id)?;
        let mut document = match serde_json::to_value(&current)? {
            Value::Object(map) => map,
            _ => {
                return Err(EngineError::Internal(
                    "manifest did not serialize to an object".to_string(),
                ));
            }
        };

        if let Some(Value::Object(stage_patches)) = patch.remove("stages") {
            let stages = document
                .entry("stages")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(stages) = stages {
                for (name, stage_patch) in stage_patches {
                    let Value::Object(fields) = stage_patch else {
                        continue;
                    };
                    let stage = stages
                        .entry(name)
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(existing) = stage {
                        existing.extend(fields);
                    }
                }
            }
        }
        document.extend(patch);

        let mut updated: RunManifest = serde_json::from_value(Value::Object(document))
            .map_err(|e| EngineError::InvalidConfig(format!("invalid manifest patch: {}", e)))?;
        updated.updated_at = Utc::now();

        self.write(&updated)?;
        Ok(updated)
    }

    fn write(&self, manifest: &RunManifest) -> Result<()> {
        let bytes = serde_json::to_vec(manifest)?;
        self.store
            .put(&self.bucket, &manifest_key(manifest.run_id), &bytes)
    }
}

static_assertions::assert_impl_all!(ManifestStore: Send, Sync);
