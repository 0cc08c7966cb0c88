//! In-memory registry of asynchronous jobs.
//!
//! The [`JobTracker`] is the only state shared between the threads that
//! submit and poll jobs and the workers that run them. Every
//! read-modify-write happens inside one critical section of a single
//! `parking_lot::Mutex`, and every read hands back an independent clone, so
//! a snapshot can be inspected or mutated freely without touching the
//! registry.
//!
//! A job moves `Pending -> Running -> Completed | Failed`. Terminal states
//! are final: once [`JobTracker::complete`] or [`JobTracker::fail`] has
//! been applied, every further mutation returns
//! [`EngineError::JobFinalized`].
//!
//! Calls for an id the tracker does not know return
//! [`EngineError::JobNotFound`]. Workers treat that as a race with
//! [`JobTracker::reset`] and log it rather than failing.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_transform::tracker::{JobTracker, JobUpdate, JobStatus};
//!
//! let tracker: JobTracker<String> = JobTracker::new();
//! let id = tracker.create();
//! tracker.update(id, JobUpdate::new().status(JobStatus::Running).progress(50.0))?;
//! tracker.complete(id, "done".to_string(), None)?;
//! assert_eq!(tracker.get(id).unwrap().status, JobStatus::Completed);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Snapshot of a tracked job.
#[derive(Debug, Clone, Serialize)]
pub struct Job<R> {
    pub id: JobId,
    pub status: JobStatus,
    /// Advisory progress in percent (0.0 - 100.0)
    pub progress: f32,
    pub message: String,
    /// Set only when `status` is `Completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    /// Set only when `status` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Cancellation was requested. Running workers are not interrupted.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    sequence: u64,
}

impl<R> Job<R> {
    fn pending(id: JobId, sequence: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            result: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
            sequence,
        }
    }
}

/// Partial update applied by [`JobTracker::update`]. Omitted fields are
/// left unchanged.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    progress: Option<f32>,
    message: Option<String>,
    status: Option<JobStatus>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set progress in percent; clamped to [0, 100].
    pub fn progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Request a status change; only `Pending -> Running` is accepted.
    /// Terminal states go through [`JobTracker::complete`] and
    /// [`JobTracker::fail`].
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Thread-safe registry of jobs producing results of type `R`.
pub struct JobTracker<R> {
    jobs: Mutex<HashMap<JobId, Job<R>>>,
    next_sequence: AtomicU64,
}

impl<R: Clone> Default for JobTracker<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone> JobTracker<R> {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Register a new Pending job and return its id.
    pub fn create(&self) -> JobId {
        let mut jobs = self.jobs.lock();
        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        jobs.insert(id, Job::pending(id, sequence));
        id
    }

    /// Apply a partial update to a live job.
    ///
    /// The only status change allowed here is `Pending -> Running` (setting
    /// the current status again is a no-op). Terminal states go through
    /// [`JobTracker::complete`] and [`JobTracker::fail`]; anything else is
    /// [`EngineError::InvalidTransition`].
    pub fn update(&self, id: JobId, update: JobUpdate) -> Result<Job<R>> {
        self.mutate(id, |job| {
            if let Some(status) = update.status {
                let allowed = status == job.status
                    || (job.status == JobStatus::Pending && status == JobStatus::Running);
                if !allowed {
                    return Err(EngineError::InvalidTransition {
                        id,
                        from: job.status,
                        to: status,
                    });
                }
                job.status = status;
            }
            if let Some(progress) = update.progress {
                job.progress = clamp_progress(progress);
            }
            if let Some(message) = update.message {
                job.message = message;
            }
            Ok(())
        })
    }

    /// Finalize a job as Completed with its result.
    pub fn complete(&self, id: JobId, result: R, message: Option<String>) -> Result<Job<R>> {
        self.mutate(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100.0;
            job.message = message.unwrap_or_else(|| "Job complete".to_string());
            job.result = Some(result);
            job.error = None;
            Ok(())
        })
    }

    /// Finalize a job as Failed with a human-readable error.
    pub fn fail(&self, id: JobId, error: impl Into<String>) -> Result<Job<R>> {
        let error = error.into();
        self.mutate(id, |job| {
            job.status = JobStatus::Failed;
            job.progress = 100.0;
            job.message = "Job failed".to_string();
            job.result = None;
            job.error = Some(error);
            Ok(())
        })
    }

    /// Flag a job for cancellation. The worker is not interrupted.
    pub fn request_cancel(&self, id: JobId) -> Result<Job<R>> {
        self.mutate(id, |job| {
            job.cancel_requested = true;
            Ok(())
        })
    }

    /// Independent snapshot of a job, or `None` if it is not tracked.
    pub fn get(&self, id: JobId) -> Option<Job<R>> {
        self.jobs.lock().get(&id).cloned()
    }

    /// Stop tracking a job. Unknown ids are ignored.
    pub fn reset(&self, id: JobId) {
        self.jobs.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Ids of all tracked jobs in creation order.
    pub fn job_ids(&self) -> Vec<JobId> {
        let jobs = self.jobs.lock();
        let mut entries: Vec<_> = jobs.values().map(|j| (j.sequence, j.id)).collect();
        entries.sort_unstable_by_key(|(sequence, _)| *sequence);
        entries.into_iter().map(|(_, id)| id).collect()
    }

    fn mutate<F>(&self, id: JobId, apply: F) -> Result<Job<R>>
    where
        F: FnOnce(&mut Job<R>) -> Result<()>,
    {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&id).ok_or(EngineError::JobNotFound(id))?;
        if job.status.is_terminal() {
            return Err(EngineError::JobFinalized(id));
        }
        apply(job)?;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }
}

fn clamp_progress(progress: f32) -> f32 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

static_assertions::assert_impl_all!(JobTracker<String>: Send, Sync);
static_assertions::assert_impl_all!(JobId: Send, Sync, Copy);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn tracker() -> JobTracker<String> {
        JobTracker::new()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_get_unknown_returns_none() {
        assert!(tracker().get(JobId::new()).is_none());
    }

    #[test]
    fn test_create_is_pending() {
        let tracker = tracker();
        let id = tracker.create();
        let job = tracker.get(id).unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.message, "Queued");
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_create_ids_are_unique() {
        let tracker = tracker();
        let a = tracker.create();
        let b = tracker.create();
        assert_ne!(a, b);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.job_ids().len(), 2);
    }

    #[test]
    fn test_update_clamps_and_keeps_omitted_fields() {
        let tracker = tracker();
        let id = tracker.create();

        let job = tracker
            .update(id, JobUpdate::new().progress(150.0).status(JobStatus::Running))
            .unwrap();
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.message, "Queued");

        let job = tracker.update(id, JobUpdate::new().progress(-3.0)).unwrap();
        assert_eq!(job.progress, 0.0);
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn test_update_rejects_terminal_status() {
        let tracker = tracker();
        let id = tracker.create();
        assert!(
            tracker
                .update(id, JobUpdate::new().status(JobStatus::Completed))
                .is_err_and(|e| e.error_code() == "INVALID_TRANSITION")
        );
        assert_eq!(tracker.get(id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_update_never_moves_running_back_to_pending() {
        let tracker = tracker();
        let id = tracker.create();
        tracker
            .update(id, JobUpdate::new().status(JobStatus::Running).progress(40.0))
            .unwrap();

        let err = tracker
            .update(id, JobUpdate::new().status(JobStatus::Pending).progress(90.0))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");

        let job = tracker.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 40.0);

        // Re-asserting the current status is accepted.
        assert!(tracker.update(id, JobUpdate::new().status(JobStatus::Running)).is_ok());
    }

    #[test]
    fn test_job_ids_follow_creation_order() {
        let tracker = tracker();
        let ids: Vec<JobId> = (0..200).map(|_| tracker.create()).collect();
        assert_eq!(tracker.job_ids(), ids);

        tracker.reset(ids[10]);
        let expected: Vec<JobId> = ids.iter().copied().filter(|id| *id != ids[10]).collect();
        assert_eq!(tracker.job_ids(), expected);
    }

    #[test]
    fn test_complete_sets_result_and_clears_error() {
        let tracker = tracker();
        let id = tracker.create();
        let job = tracker.complete(id, "payload".to_string(), None).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.message, "Job complete");
        assert_eq!(job.result.as_deref(), Some("payload"));
        assert!(job.error.is_none());
    }

    #[test]
    fn test_fail_sets_error_and_clears_result() {
        let tracker = tracker();
        let id = tracker.create();
        let job = tracker.fail(id, "boom").unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert!(job.result.is_none());
    }

    #[test]
    fn test_finalized_job_is_never_mutated() {
        let tracker = tracker();
        let id = tracker.create();
        tracker.complete(id, "first".to_string(), None).unwrap();

        assert!(matches!(
            tracker.fail(id, "late"),
            Err(EngineError::JobFinalized(_))
        ));
        assert!(matches!(
            tracker.update(id, JobUpdate::new().progress(10.0)),
            Err(EngineError::JobFinalized(_))
        ));

        let job = tracker.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.as_deref(), Some("first"));
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let tracker = tracker();
        let id = JobId::new();

        assert!(tracker.update(id, JobUpdate::new()).unwrap_err().is_not_found());
        assert!(tracker.complete(id, String::new(), None).unwrap_err().is_not_found());
        assert!(tracker.fail(id, "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_reset_removes_and_ignores_unknown() {
        let tracker = tracker();
        let id = tracker.create();
        tracker.reset(id);
        tracker.reset(id);
        assert!(tracker.get(id).is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_request_cancel_only_flags() {
        let tracker = tracker();
        let id = tracker.create();
        let job = tracker.request_cancel(id).unwrap();
        assert!(job.cancel_requested);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let tracker = tracker();
        let id = tracker.create();

        let mut snapshot = tracker.get(id).unwrap();
        snapshot.message = "tampered".to_string();
        snapshot.status = JobStatus::Failed;

        let fresh = tracker.get(id).unwrap();
        assert_eq!(fresh.message, "Queued");
        assert_eq!(fresh.status, JobStatus::Pending);
    }

    #[test]
    fn test_job_id_roundtrips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    // =========================================================================
    // Concurrency
    // =========================================================================

    #[test]
    fn test_concurrent_updates_same_job() {
        let tracker = Arc::new(tracker());
        let id = tracker.create();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for i in 0..100 {
                        tracker
                            .update(
                                id,
                                JobUpdate::new()
                                    .progress(i as f32)
                                    .message(format!("thread {t} step {i}")),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let job = tracker.get(id).unwrap();
        assert!((0.0..=100.0).contains(&job.progress));
        assert!(job.message.starts_with("thread "));
    }

    #[test]
    fn test_exactly_one_finalizer_wins() {
        let tracker = Arc::new(tracker());
        let id = tracker.create();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    if t % 2 == 0 {
                        tracker.complete(id, format!("r{t}"), None).is_ok()
                    } else {
                        tracker.fail(id, format!("e{t}")).is_ok()
                    }
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);

        let job = tracker.get(id).unwrap();
        assert!(job.result.is_some() ^ job.error.is_some());
    }
}
