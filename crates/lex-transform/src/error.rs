//! Custom error types for the transformation engine.
//!
//! This module provides a single error hierarchy using `thiserror` for the
//! job tracker, the step engine, storage and the runner.
//!
//! The variants fall into four families that callers treat differently:
//!
//! - **Not found** (`JobNotFound`): a job was evicted while a worker still
//!   held its id. Callers log it and move on; it is never shown to a user.
//! - **Configuration** (`InvalidConfig`): a pipeline could not be built.
//!   Raised before any step touches data.
//! - **Transform** (`ColumnNotFound`, `NoValidValues`, `StepFailed`,
//!   `InvalidDataset`): a step could not be applied to the given data.
//! - **I/O** (`ObjectNotFound`, `Storage`, `UnsupportedFormat`, `Io`):
//!   reading or persisting a dataset failed.
//!
//! Errors are serializable so that a failed job can be returned to a client
//! as `{ "code": ..., "message": ... }`.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

use crate::tracker::{JobId, JobStatus};

/// The main error type for the transformation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Job id is not (or no longer) tracked.
    #[error("Job '{0}' is no longer tracked")]
    JobNotFound(JobId),

    /// Job already reached a terminal state and cannot change.
    #[error("Job '{0}' is already finalized")]
    JobFinalized(JobId),

    /// Status change the job lifecycle does not allow.
    #[error("Job '{id}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Step configuration is malformed or refers to an unknown step.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Column was not found in the dataset.
    #[error("Column '{0}' not found in dataset")]
    ColumnNotFound(String),

    /// No valid values found in a column for computation.
    #[error("No valid values found in column '{0}'")]
    NoValidValues(String),

    /// A step could not be applied to the data it was given.
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// Dataset violates the row identity invariant.
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    /// Object does not exist in the store.
    #[error("Object '{bucket}/{key}' not found")]
    ObjectNotFound { bucket: String, key: String },

    /// Store read or write failure.
    #[error("Storage error for '{bucket}/{key}': {reason}")]
    Storage {
        bucket: String,
        key: String,
        reason: String,
    },

    /// File extension has no codec.
    #[error("Unsupported dataset format: '{0}'")]
    UnsupportedFormat(String),

    /// Internal error (e.g., worker panic).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Shorthand for a [`EngineError::StepFailed`].
    pub fn step(step: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::StepFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Get error code for client handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::JobNotFound(_) => "JOB_NOT_FOUND",
            Self::JobFinalized(_) => "JOB_FINALIZED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            Self::NoValidValues(_) => "NO_VALID_VALUES",
            Self::StepFailed { .. } => "STEP_FAILED",
            Self::InvalidDataset(_) => "INVALID_DATASET",
            Self::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error means the job is no longer tracked.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::JobNotFound(_) => true,
            Self::WithContext { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error was raised while building a pipeline.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::InvalidConfig(_) => true,
            Self::WithContext { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Serialize implementation for client payloads.
///
/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("EngineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EngineError::Polars(e).with_context(context))
    }
}
