//! Configuration for the transformation engine.
//!
//! This module provides [`EngineConfig`] with a builder for programmatic
//! setup and an environment overlay for deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of common rows below which diffing stays single-threaded.
pub const DEFAULT_DIFF_PARALLEL_THRESHOLD: usize = 2_000;

/// Default minimum number of rows handed to a single diff worker.
pub const DEFAULT_DIFF_MIN_CHUNK_ROWS: usize = 1_000;

/// Default distinct-value count above which one-hot encoding is downgraded.
pub const DEFAULT_MAX_ONE_HOT_CARDINALITY: usize = 100;

/// Configuration for the engine, runner and diff.
///
/// Use [`EngineConfig::builder()`] to create a configuration with the
/// fluent API, or [`EngineConfig::from_env()`] to read it from the
/// process environment.
///
/// # Example
///
/// ```rust,ignore
/// use lex_transform::config::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .worker_threads(4)
///     .preview_row_limit(Some(50))
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of threads in the run worker pool.
    /// Default: available parallelism
    pub worker_threads: usize,

    /// Common-row count below which the diff runs sequentially.
    /// Default: 2000
    pub diff_parallel_threshold: usize,

    /// Minimum rows per diff chunk; caps the number of diff workers.
    /// Default: 1000
    pub diff_min_chunk_rows: usize,

    /// Number of rows returned in `preview` / `original_preview`.
    /// `None` returns every row.
    /// Default: Some(100)
    pub preview_row_limit: Option<usize>,

    /// Maximum deleted identities returned with a result.
    /// Default: 10000
    pub max_deleted_in_response: usize,

    /// Maximum rows with changed cells returned with a result.
    /// Default: 10000
    pub max_updated_rows_in_response: usize,

    /// Distinct-value count above which one-hot encoding becomes label encoding.
    /// Default: 100
    pub max_one_hot_cardinality: usize,

    /// Bucket holding uploaded input datasets.
    /// Default: "uploads"
    pub input_bucket: String,

    /// Bucket receiving preprocessing output.
    /// Default: "cleaned-data"
    pub cleaned_bucket: String,

    /// Bucket receiving feature-engineering output.
    /// Default: "feature-engineered"
    pub feature_engineered_bucket: String,

    /// Bucket holding pipeline run manifests.
    /// Default: "training-results"
    pub manifest_bucket: String,

    /// Root directory for the local object store.
    /// Default: "data"
    pub storage_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            diff_parallel_threshold: DEFAULT_DIFF_PARALLEL_THRESHOLD,
            diff_min_chunk_rows: DEFAULT_DIFF_MIN_CHUNK_ROWS,
            preview_row_limit: Some(100),
            max_deleted_in_response: 10_000,
            max_updated_rows_in_response: 10_000,
            max_one_hot_cardinality: DEFAULT_MAX_ONE_HOT_CARDINALITY,
            input_bucket: "uploads".to_string(),
            cleaned_bucket: "cleaned-data".to_string(),
            feature_engineered_bucket: "feature-engineered".to_string(),
            manifest_bucket: "training-results".to_string(),
            storage_root: PathBuf::from("data"),
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl EngineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Build a configuration from defaults overlaid with process environment
    /// variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `LEX_WORKER_THREADS` | `worker_threads` |
    /// | `LEX_STORAGE_ROOT` | `storage_root` |
    /// | `LEX_PREVIEW_ROWS` | `preview_row_limit` (`0` = unlimited) |
    /// | `MINIO_BUCKET` | `input_bucket` |
    /// | `CLEANED_BUCKET` | `cleaned_bucket` |
    /// | `FEATURE_ENGINEERED_BUCKET` | `feature_engineered_bucket` |
    /// | `TRAINING_RESULTS_BUCKET` | `manifest_bucket` |
    pub fn from_env() -> Result<Self, ConfigValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LEX_WORKER_THREADS") {
            config.worker_threads = parse_usize("LEX_WORKER_THREADS", &raw)?;
        }
        if let Some(raw) = lookup("LEX_PREVIEW_ROWS") {
            config.preview_row_limit = match parse_usize("LEX_PREVIEW_ROWS", &raw)? {
                0 => None,
                n => Some(n),
            };
        }
        if let Some(root) = lookup("LEX_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Some(bucket) = lookup("MINIO_BUCKET") {
            config.input_bucket = bucket;
        }
        if let Some(bucket) = lookup("CLEANED_BUCKET") {
            config.cleaned_bucket = bucket;
        }
        if let Some(bucket) = lookup("FEATURE_ENGINEERED_BUCKET") {
            config.feature_engineered_bucket = bucket;
        }
        if let Some(bucket) = lookup("TRAINING_RESULTS_BUCKET") {
            config.manifest_bucket = bucket;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.worker_threads == 0 {
            return Err(ConfigValidationError::ZeroValue("worker_threads"));
        }
        if self.diff_min_chunk_rows == 0 {
            return Err(ConfigValidationError::ZeroValue("diff_min_chunk_rows"));
        }
        if self.max_one_hot_cardinality == 0 {
            return Err(ConfigValidationError::ZeroValue("max_one_hot_cardinality"));
        }

        for (field, value) in [
            ("input_bucket", &self.input_bucket),
            ("cleaned_bucket", &self.cleaned_bucket),
            ("feature_engineered_bucket", &self.feature_engineered_bucket),
            ("manifest_bucket", &self.manifest_bucket),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigValidationError::EmptyBucket(field));
            }
        }

        Ok(())
    }
}

fn parse_usize(var: &str, raw: &str) -> Result<usize, ConfigValidationError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| ConfigValidationError::InvalidEnv {
            var: var.to_string(),
            value: raw.to_string(),
        })
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid value for '{0}': must be at least 1")]
    ZeroValue(&'static str),

    #[error("Bucket name '{0}' must not be empty")]
    EmptyBucket(&'static str),

    #[error("Environment variable {var}='{value}' is not a valid number")]
    InvalidEnv { var: String, value: String },
}

/// Builder for [`EngineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    worker_threads: Option<usize>,
    diff_parallel_threshold: Option<usize>,
    diff_min_chunk_rows: Option<usize>,
    preview_row_limit: Option<Option<usize>>,
    max_deleted_in_response: Option<usize>,
    max_updated_rows_in_response: Option<usize>,
    max_one_hot_cardinality: Option<usize>,
    input_bucket: Option<String>,
    cleaned_bucket: Option<String>,
    feature_engineered_bucket: Option<String>,
    manifest_bucket: Option<String>,
    storage_root: Option<PathBuf>,
}

impl EngineConfigBuilder {
    /// Set the number of run worker threads.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Set the common-row count below which the diff runs sequentially.
    pub fn diff_parallel_threshold(mut self, rows: usize) -> Self {
        self.diff_parallel_threshold = Some(rows);
        self
    }

    /// Set the minimum number of rows per diff chunk.
    pub fn diff_min_chunk_rows(mut self, rows: usize) -> Self {
        self.diff_min_chunk_rows = Some(rows);
        self
    }

    /// Set how many rows a result preview carries (`None` = all rows).
    pub fn preview_row_limit(mut self, limit: Option<usize>) -> Self {
        self.preview_row_limit = Some(limit);
        self
    }

    /// Cap deleted identities returned with a result.
    pub fn max_deleted_in_response(mut self, max: usize) -> Self {
        self.max_deleted_in_response = Some(max);
        self
    }

    /// Cap rows with changed cells returned with a result.
    pub fn max_updated_rows_in_response(mut self, max: usize) -> Self {
        self.max_updated_rows_in_response = Some(max);
        self
    }

    /// Set the one-hot downgrade threshold.
    pub fn max_one_hot_cardinality(mut self, max: usize) -> Self {
        self.max_one_hot_cardinality = Some(max);
        self
    }

    /// Set the input bucket.
    pub fn input_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.input_bucket = Some(bucket.into());
        self
    }

    /// Set the preprocessing output bucket.
    pub fn cleaned_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.cleaned_bucket = Some(bucket.into());
        self
    }

    /// Set the feature-engineering output bucket.
    pub fn feature_engineered_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.feature_engineered_bucket = Some(bucket.into());
        self
    }

    /// Set the pipeline run manifest bucket.
    pub fn manifest_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.manifest_bucket = Some(bucket.into());
        self
    }

    /// Set the local object store root.
    pub fn storage_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(path.into());
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `EngineConfig` or an error if validation fails.
    pub fn build(self) -> Result<EngineConfig, ConfigValidationError> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            worker_threads: self.worker_threads.unwrap_or(defaults.worker_threads),
            diff_parallel_threshold: self
                .diff_parallel_threshold
                .unwrap_or(defaults.diff_parallel_threshold),
            diff_min_chunk_rows: self
                .diff_min_chunk_rows
                .unwrap_or(defaults.diff_min_chunk_rows),
            preview_row_limit: self
                .preview_row_limit
                .unwrap_or(defaults.preview_row_limit),
            max_deleted_in_response: self
                .max_deleted_in_response
                .unwrap_or(defaults.max_deleted_in_response),
            max_updated_rows_in_response: self
                .max_updated_rows_in_response
                .unwrap_or(defaults.max_updated_rows_in_response),
            max_one_hot_cardinality: self
                .max_one_hot_cardinality
                .unwrap_or(defaults.max_one_hot_cardinality),
            input_bucket: self.input_bucket.unwrap_or(defaults.input_bucket),
            cleaned_bucket: self.cleaned_bucket.unwrap_or(defaults.cleaned_bucket),
            feature_engineered_bucket: self
                .feature_engineered_bucket
                .unwrap_or(defaults.feature_engineered_bucket),
            manifest_bucket: self.manifest_bucket.unwrap_or(defaults.manifest_bucket),
            storage_root: self.storage_root.unwrap_or(defaults.storage_root),
        };

        config.validate()?;
        Ok(config)
    }
}
