//! Progress reporting for pipeline runs.
//!
//! A run moves through fixed [`RunStage`]s. Each stage owns a slice of the
//! 0-100 range; the transforming stage is subdivided evenly across the
//! pipeline's steps. Percentages are advisory: they are non-decreasing
//! within a run and reach 100 only when the job is finalized.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_transform::runner::progress::{ClosureProgressReporter, ProgressUpdate};
//!
//! let reporter = ClosureProgressReporter::new(|update: ProgressUpdate| {
//!     println!("[{:>3.0}%] {}", update.progress, update.message);
//! });
//! engine.run(&pipeline, &dataset, None, &reporter)?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::tracker::{JobId, JobStatus, JobTracker, JobUpdate};

/// Stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Worker picked up the job
    Initializing,
    /// Fetching the input object
    Loading,
    /// Input decoded, identity assigned
    Loaded,
    /// Applying steps
    Transforming,
    /// Comparing original and transformed datasets
    Diffing,
    /// Writing the output artifact
    Persisting,
    /// Building previews and the result payload
    Packaging,
}

impl RunStage {
    /// Progress (percent) at the start of this stage.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 1.0,
            Self::Loading => 5.0,
            Self::Loaded => 12.0,
            Self::Transforming => 20.0,
            Self::Diffing => 82.0,
            Self::Persisting => 86.0,
            Self::Packaging => 94.0,
        }
    }

    /// Share of the range (percent) this stage spans.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Transforming => 60.0,
            _ => 0.0,
        }
    }
}

/// A single progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: RunStage,

    /// Step name while transforming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 100.0)
    pub progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    /// Update at the start of a stage.
    pub fn new(stage: RunStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            sub_stage: None,
            progress: stage.base_progress(),
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Update after `current` of `total` items of a stage are done.
    pub fn with_items(
        stage: RunStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let fraction = if total > 0 {
            current as f32 / total as f32
        } else {
            1.0
        };
        let progress = stage.base_progress() + stage.weight() * fraction.clamp(0.0, 1.0);
        Self {
            stage,
            sub_stage: Some(sub_stage.into()),
            progress: progress.clamp(0.0, 100.0),
            message: message.into(),
            items_processed: Some(current),
            items_total: Some(total),
        }
    }
}

/// Receives progress updates during a run.
///
/// Implementations must be `Send + Sync`; runs execute on pool threads.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Discards every update. Used by synchronous previews.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressReporter;

impl ProgressReporter for NoopProgressReporter {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Forwards updates to a tracked job, marking it Running.
///
/// Finalization goes through [`JobTracker::complete`] and
/// [`JobTracker::fail`]. A job that is no longer tracked is logged and
/// otherwise ignored.
pub struct TrackerProgressReporter<R> {
    tracker: Arc<JobTracker<R>>,
    job_id: JobId,
}

impl<R: Clone> TrackerProgressReporter<R> {
    pub fn new(tracker: Arc<JobTracker<R>>, job_id: JobId) -> Self {
        Self { tracker, job_id }
    }
}

impl<R: Clone + Send> ProgressReporter for TrackerProgressReporter<R> {
    fn report(&self, update: ProgressUpdate) {
        let job_update = JobUpdate::new()
            .status(JobStatus::Running)
            .progress(update.progress)
            .message(update.message);

        match self.tracker.update(self.job_id, job_update) {
            Ok(_) => {}
            Err(EngineError::JobNotFound(id)) => {
                warn!("Job {} is no longer tracked; dropping progress update", id);
            }
            Err(e) => debug!("Progress update for job {} ignored: {}", self.job_id, e),
        }
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);
static_assertions::assert_impl_all!(NoopProgressReporter: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_stage_bases_are_increasing() {
        let stages = [
            RunStage::Initializing,
            RunStage::Loading,
            RunStage::Loaded,
            RunStage::Transforming,
            RunStage::Diffing,
            RunStage::Persisting,
            RunStage::Packaging,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].base_progress() < pair[1].base_progress());
        }
        assert!(
            RunStage::Transforming.base_progress() + RunStage::Transforming.weight()
                <= RunStage::Diffing.base_progress()
        );
        assert!(RunStage::Packaging.base_progress() < 100.0);
    }

    #[test]
    fn test_with_items_subdivides_transforming() {
        let half = ProgressUpdate::with_items(RunStage::Transforming, "Scaling", 1, 2, "half");
        assert_eq!(half.progress, 50.0);

        let done = ProgressUpdate::with_items(RunStage::Transforming, "Scaling", 2, 2, "done");
        assert_eq!(done.progress, 80.0);

        let empty = ProgressUpdate::with_items(RunStage::Transforming, "none", 0, 0, "empty");
        assert_eq!(empty.progress, 80.0);
    }

    #[test]
    fn test_closure_reporter_receives_updates() {
        let seen = Mutex::new(Vec::new());
        let reporter = ClosureProgressReporter::new(|u: ProgressUpdate| seen.lock().push(u.progress));

        reporter.report(ProgressUpdate::new(RunStage::Loading, "loading"));
        reporter.report(ProgressUpdate::new(RunStage::Loaded, "loaded"));

        assert_eq!(*seen.lock(), vec![5.0, 12.0]);
    }

    #[test]
    fn test_tracker_reporter_updates_job() {
        let tracker: Arc<JobTracker<String>> = Arc::new(JobTracker::new());
        let id = tracker.create();
        let reporter = TrackerProgressReporter::new(Arc::clone(&tracker), id);

        reporter.report(ProgressUpdate::new(RunStage::Diffing, "Computing diff"));

        let job = tracker.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 82.0);
        assert_eq!(job.message, "Computing diff");
    }

    #[test]
    fn test_tracker_reporter_tolerates_evicted_job() {
        let tracker: Arc<JobTracker<String>> = Arc::new(JobTracker::new());
        let id = tracker.create();
        tracker.reset(id);

        let reporter = TrackerProgressReporter::new(Arc::clone(&tracker), id);
        reporter.report(ProgressUpdate::new(RunStage::Loading, "loading"));

        assert!(tracker.get(id).is_none());
    }
}
