//! Dataset Transformation Job Engine
//!
//! Applies ordered transformation pipelines to tabular datasets as
//! background jobs, and reports exactly which rows were deleted and which
//! cells changed.
//!
//! # Overview
//!
//! - **Row Identity**: every [`Dataset`] carries a stable `_row_id` column,
//!   assigned once at load time and copied by every step
//! - **Job Tracker**: a concurrency-safe registry clients poll for status
//! - **Step Engine**: ordered, validated steps, each producing a
//!   [`ChangeMetadata`] record
//! - **Diff Engine**: identity-keyed before/after comparison, parallel for
//!   large datasets
//! - **Pipeline Runner**: submit, execute on a worker pool, poll
//! - **Suggestions**: cleaning and feature engineering steps proposed from
//!   a full profile of the input
//! - **Run Manifests**: per-run JSON documents tracking every stage
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lex_transform::{
//!     DatasetRef, EngineConfig, InMemoryObjectStore, JobTracker, PipelineKind,
//!     PipelineRunner, RunRequest, parse_steps,
//! };
//! use serde_json::json;
//! use std::{sync::Arc, time::Duration};
//!
//! let store = Arc::new(InMemoryObjectStore::new());
//! store.put("uploads", "people.csv", csv_bytes)?;
//!
//! let runner = PipelineRunner::new(EngineConfig::default(), store, Arc::new(JobTracker::new()))?;
//! let id = runner.submit(RunRequest {
//!     input: DatasetRef::new("uploads", "people.csv"),
//!     steps: parse_steps(json!([
//!         {"type": "remove_duplicates"},
//!         {"type": "fill_nulls", "strategies": {"age": {"strategy": "median"}}},
//!     ]))?,
//!     kind: PipelineKind::Preprocessing,
//! });
//!
//! let job = runner.wait_for(id, Duration::from_secs(60));
//! ```
//!
//! # Steps
//!
//! | `type` | Effect |
//! |--------|--------|
//! | `remove_duplicates` | Drop repeated rows, keeping the first |
//! | `remove_nulls` | Drop rows with missing values |
//! | `fill_nulls` | Impute per column (mean, median, mode, custom) |
//! | `drop_columns` | Remove named columns |
//! | `remove_outliers` | IQR or z-score row filter |
//! | `scaling` | standard, minmax, robust or log |
//! | `encoding` | one-hot, label or target |
//! | `binning` | equal-width or quantile `<col>_binned` |
//! | `feature_creation` | polynomial, datetime parts, group aggregation |
//! | `feature_selection` | variance threshold or correlation filter |

pub mod config;
pub mod dataset;
pub mod diff;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod runner;
pub mod steps;
pub mod storage;
pub mod suggest;
pub mod tracker;
pub mod utils;

// Re-export main types
pub use config::{ConfigValidationError, EngineConfig, EngineConfigBuilder};
pub use dataset::{CellValue, Dataset, DatasetFormat, ROW_ID_COLUMN};
pub use diff::{DiffEngine, DiffMarks, DiffResult};
pub use engine::{EngineOutput, StepEngine};
pub use error::{EngineError, Result, ResultExt};
pub use manifest::{ManifestStore, RunManifest};
pub use runner::progress::{
    ClosureProgressReporter, NoopProgressReporter, ProgressReporter, ProgressUpdate, RunStage,
    TrackerProgressReporter,
};
pub use runner::{ColumnSummary, PipelineKind, PipelineRunner, RunOutcome, RunRequest};
pub use steps::{ChangeMetadata, Pipeline, Step, StepConfig, StepContext, parse_steps};
pub use storage::{DatasetRef, InMemoryObjectStore, LocalObjectStore, ObjectStore};
pub use suggest::{DatasetAnalysis, PreprocessingSuggestions, analyze_features, suggest_preprocessing};
pub use tracker::{Job, JobId, JobStatus, JobTracker, JobUpdate};
