//! Fire-and-forget pipeline runs with polling.
//!
//! [`PipelineRunner::submit`] registers a job and returns its id at once;
//! the run itself executes on the runner's rayon pool. Clients poll the
//! [`JobTracker`] until the job is `Completed` or `Failed`.
//!
//! A run goes through these stages:
//!
//! 1. Validate the pipeline
//! 2. Load and decode the input object, assigning row identities
//! 3. Apply the steps in order
//! 4. Diff the original against the transformed dataset
//! 5. Persist the transformed dataset (identity column dropped)
//! 6. Assemble the [`RunOutcome`] and complete the job
//!
//! Any error, including a panic inside a step, fails the job with a
//! readable message and no payload.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_transform::{EngineConfig, InMemoryObjectStore, JobTracker, PipelineRunner};
//!
//! let runner = PipelineRunner::new(
//!     EngineConfig::default(),
//!     Arc::new(InMemoryObjectStore::new()),
//!     Arc::new(JobTracker::new()),
//! )?;
//! let id = runner.submit(request);
//! let job = runner.wait_for(id, Duration::from_secs(30));
//! ```

pub mod progress;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::dataset::{self, Dataset, value::frame_to_rows};
use crate::diff::{DiffEngine, DiffMarks};
use crate::engine::StepEngine;
use crate::error::{EngineError, Result, ResultExt};
use crate::manifest::ManifestStore;
use crate::steps::{ChangeMetadata, Pipeline, StepConfig};
use crate::storage::{DatasetRef, ObjectStore};
use crate::suggest::{DatasetAnalysis, PreprocessingSuggestions, analyze_features, suggest_preprocessing};
use crate::tracker::{Job, JobId, JobTracker};
use progress::{
    NoopProgressReporter, ProgressReporter, ProgressUpdate, RunStage, TrackerProgressReporter,
};

/// Which service a run belongs to; selects the output bucket and name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    #[default]
    Preprocessing,
    FeatureEngineering,
}

impl PipelineKind {
    pub fn output_prefix(&self) -> &'static str {
        match self {
            Self::Preprocessing => "cleaned_",
            Self::FeatureEngineering => "feature_engineered_",
        }
    }

    pub fn output_bucket<'a>(&self, config: &'a EngineConfig) -> &'a str {
        match self {
            Self::Preprocessing => &config.cleaned_bucket,
            Self::FeatureEngineering => &config.feature_engineered_bucket,
        }
    }

    fn completion_message(&self) -> &'static str {
        match self {
            Self::Preprocessing => "Preprocessing complete",
            Self::FeatureEngineering => "Feature engineering complete",
        }
    }
}

/// A submitted run.
///
/// Steps are validated by the worker, so a bad configuration shows up as a
/// failed job rather than a rejected submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub input: DatasetRef,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub kind: PipelineKind,
}

/// Column names before and after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub original: Vec<String>,
    pub transformed: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ColumnSummary {
    fn between(original: &Dataset, transformed: &Dataset) -> Self {
        let original = original.data_columns();
        let transformed = transformed.data_columns();
        let added = transformed
            .iter()
            .filter(|c| !original.contains(c))
            .cloned()
            .collect();
        let removed = original
            .iter()
            .filter(|c| !transformed.contains(c))
            .cloned()
            .collect();
        Self {
            original,
            transformed,
            added,
            removed,
        }
    }
}

/// Payload of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Persisted artifact; `None` for previews
    pub output: Option<DatasetRef>,
    pub preview: Vec<Map<String, Value>>,
    pub original_preview: Vec<Map<String, Value>>,
    pub diff: DiffMarks,
    pub change_metadata: Vec<ChangeMetadata>,
    pub original_row_count: usize,
    pub transformed_row_count: usize,
    pub column_summary: ColumnSummary,
    pub preview_row_limit: Option<usize>,
}

/// State shared by the runner handle and its workers.
struct RunnerContext {
    config: Arc<EngineConfig>,
    store: Arc<dyn ObjectStore>,
    tracker: Arc<JobTracker<RunOutcome>>,
    engine: StepEngine,
    diff: DiffEngine,
}

/// Submits pipeline runs to a bounded worker pool.
pub struct PipelineRunner {
    inner: Arc<RunnerContext>,
    pool: ThreadPool,
    manifests: ManifestStore,
}

impl PipelineRunner {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ObjectStore>,
        tracker: Arc<JobTracker<RunOutcome>>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("lex-run-{}", i))
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build worker pool: {}", e)))?;

        let manifests = ManifestStore::new(Arc::clone(&store), config.manifest_bucket.clone());
        let inner = RunnerContext {
            engine: StepEngine::from_config(&config),
            diff: DiffEngine::from(&config),
            config: Arc::new(config),
            store,
            tracker,
        };
        Ok(Self {
            inner: Arc::new(inner),
            pool,
            manifests,
        })
    }

    pub fn tracker(&self) -> &Arc<JobTracker<RunOutcome>> {
        &self.inner.tracker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Register a job and start it in the background.
    pub fn submit(&self, request: RunRequest) -> JobId {
        let id = self.inner.tracker.create();
        info!(
            "Submitted job {} ({:?}, {} steps, input {})",
            id,
            request.kind,
            request.steps.len(),
            request.input
        );

        let inner = Arc::clone(&self.inner);
        self.pool.spawn(move || inner.execute(id, request));
        id
    }

    /// Run steps synchronously without persisting anything or creating a
    /// job. With `upto = Some(n)` only steps `0..=n` are applied.
    pub fn preview(
        &self,
        input: &DatasetRef,
        steps: Vec<StepConfig>,
        upto: Option<usize>,
    ) -> Result<RunOutcome> {
        let pipeline = Pipeline::new(steps)?;
        let inner = &self.inner;
        self.pool
            .install(|| inner.process(input, &pipeline, upto, None, &NoopProgressReporter))
    }

    /// Profile an input and propose cleaning steps.
    pub fn suggest(&self, input: &DatasetRef) -> Result<PreprocessingSuggestions> {
        let inner = &self.inner;
        self.pool.install(|| {
            let dataset = inner.load(input, &NoopProgressReporter)?;
            suggest_preprocessing(&dataset)
        })
    }

    /// Profile an input and recommend feature engineering steps.
    pub fn analyze(&self, input: &DatasetRef) -> Result<DatasetAnalysis> {
        let inner = &self.inner;
        self.pool.install(|| {
            let dataset = inner.load(input, &NoopProgressReporter)?;
            analyze_features(&dataset, &input.key, inner.engine.context())
        })
    }

    /// Run manifests stored in the configured manifest bucket.
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Poll until the job is terminal or `timeout` passes, returning the
    /// last snapshot seen.
    pub fn wait_for(&self, id: JobId, timeout: Duration) -> Option<Job<RunOutcome>> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.inner.tracker.get(id)?;
            if job.status.is_terminal() || Instant::now() >= deadline {
                return Some(job);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl RunnerContext {
    /// Worker entry point. Never panics; every outcome finalizes the job.
    fn execute(&self, id: JobId, request: RunRequest) {
        let reporter = TrackerProgressReporter::new(Arc::clone(&self.tracker), id);
        reporter.report(ProgressUpdate::new(RunStage::Initializing, "Starting run"));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let pipeline = Pipeline::new(request.steps.clone())?;
            self.process(
                &request.input,
                &pipeline,
                None,
                Some(request.kind),
                &reporter,
            )
        }))
        .unwrap_or_else(|payload| {
            Err(EngineError::Internal(format!(
                "run panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

        let finalized = match result {
            Ok(outcome) => {
                info!(
                    "Job {} completed: {} -> {} rows",
                    id, outcome.original_row_count, outcome.transformed_row_count
                );
                self.tracker.complete(
                    id,
                    outcome,
                    Some(request.kind.completion_message().to_string()),
                )
            }
            Err(e) => {
                error!("Job {} failed: {}", id, e);
                self.tracker.fail(id, e.to_string())
            }
        };

        match finalized {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                warn!("Job {} was removed before it finished", id);
            }
            Err(e) => error!("Could not finalize job {}: {}", id, e),
        }
    }

    /// Fetch and decode an input object, assigning row identities.
    fn load(&self, input: &DatasetRef, reporter: &dyn ProgressReporter) -> Result<Dataset> {
        reporter.report(ProgressUpdate::new(
            RunStage::Loading,
            format!("Loading {}", input),
        ));
        let format = input.format()?;
        let bytes = self.store.get(&input.bucket, &input.key)?;
        let original = dataset::codec::decode(&bytes, format)
            .context(format!("Failed to decode {}", input))?;
        reporter.report(ProgressUpdate::new(
            RunStage::Loaded,
            format!(
                "Loaded {} rows x {} columns",
                original.height(),
                original.data_columns().len()
            ),
        ));
        Ok(original)
    }

    /// Load, transform, diff and package. Persists only when `kind` is set.
    fn process(
        &self,
        input: &DatasetRef,
        pipeline: &Pipeline,
        upto: Option<usize>,
        kind: Option<PipelineKind>,
        reporter: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        let format = input.format()?;
        let original = self.load(input, reporter)?;

        let output = self.engine.run(pipeline, &original, upto, reporter)?;
        let transformed = output.dataset;

        reporter.report(ProgressUpdate::new(RunStage::Diffing, "Computing changes"));
        let diff = self.diff.compute(&original, &transformed)?;
        let marks = diff.marks(
            self.config.max_deleted_in_response,
            self.config.max_updated_rows_in_response,
        );

        let output_ref = match kind {
            Some(kind) => {
                reporter.report(ProgressUpdate::new(RunStage::Persisting, "Saving output"));
                let target = DatasetRef::new(
                    kind.output_bucket(&self.config),
                    format!(
                        "{}{}.{}",
                        kind.output_prefix(),
                        input.base_name(),
                        format.extension()
                    ),
                );
                let bytes = dataset::codec::encode_for_export(&transformed, format)?;
                self.store.put(&target.bucket, &target.key, &bytes)?;
                info!("Saved {} ({} bytes)", target, bytes.len());
                Some(target)
            }
            None => None,
        };

        reporter.report(ProgressUpdate::new(RunStage::Packaging, "Preparing result"));
        let limit = self.config.preview_row_limit;
        Ok(RunOutcome {
            output: output_ref,
            preview: frame_to_rows(transformed.frame(), limit)?,
            original_preview: frame_to_rows(original.frame(), limit)?,
            diff: marks,
            change_metadata: output.change_metadata,
            original_row_count: original.height(),
            transformed_row_count: transformed.height(),
            column_summary: ColumnSummary::between(&original, &transformed),
            preview_row_limit: limit,
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

static_assertions::assert_impl_all!(PipelineRunner: Send, Sync);
static_assertions::assert_impl_all!(RunOutcome: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;
    use crate::tracker::JobStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CSV: &str = "name,age,city\nann,31,oslo\nbob,NA,rome\nann,31,oslo\ncid,40,\n";

    fn runner() -> (PipelineRunner, Arc<InMemoryObjectStore>) {
        let store = Arc::new(InMemoryObjectStore::new());
        store.put("uploads", "people.csv", CSV.as_bytes()).unwrap();
        let config = EngineConfig::builder().worker_threads(2).build().unwrap();
        let runner =
            PipelineRunner::new(config, store.clone(), Arc::new(JobTracker::new())).unwrap();
        (runner, store)
    }

    fn steps(value: Value) -> Vec<StepConfig> {
        crate::steps::parse_steps(value).unwrap()
    }

    fn input() -> DatasetRef {
        DatasetRef::new("uploads", "people.csv")
    }

    #[test]
    fn test_kind_names_output() {
        let config = EngineConfig::default();
        assert_eq!(PipelineKind::Preprocessing.output_bucket(&config), "cleaned-data");
        assert_eq!(
            PipelineKind::FeatureEngineering.output_prefix(),
            "feature_engineered_"
        );
    }

    #[test]
    fn test_submit_completes_and_persists() {
        let (runner, store) = runner();
        let id = runner.submit(RunRequest {
            input: input(),
            steps: steps(json!([
                {"type": "remove_duplicates"},
                {"type": "fill_nulls", "strategies": {"age": {"strategy": "mean"}}},
            ])),
            kind: PipelineKind::Preprocessing,
        });

        let job = runner.wait_for(id, Duration::from_secs(30)).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.message, "Preprocessing complete");

        let outcome = job.result.unwrap();
        assert_eq!(outcome.diff.deleted_row_indices, vec![2]);
        assert_eq!(outcome.original_row_count, 4);
        assert_eq!(outcome.transformed_row_count, 3);
        assert_eq!(
            outcome.output,
            Some(DatasetRef::new("cleaned-data", "cleaned_people.csv"))
        );
        assert!(outcome.diff.updated_cells[&1].contains_key("age"));
        assert!(store.contains("cleaned-data", "cleaned_people.csv"));

        let saved = store.get("cleaned-data", "cleaned_people.csv").unwrap();
        let header = String::from_utf8(saved).unwrap();
        assert!(!header.lines().next().unwrap().contains(crate::dataset::ROW_ID_COLUMN));
    }

    #[test]
    fn test_missing_input_fails_job() {
        let (runner, _) = runner();
        let id = runner.submit(RunRequest {
            input: DatasetRef::new("uploads", "nope.csv"),
            steps: Vec::new(),
            kind: PipelineKind::Preprocessing,
        });

        let job = runner.wait_for(id, Duration::from_secs(30)).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert!(job.error.unwrap().contains("nope.csv"));
    }

    #[test]
    fn test_invalid_pipeline_fails_job() {
        let (runner, _) = runner();
        let id = runner.submit(RunRequest {
            input: input(),
            steps: steps(json!([{"type": "binning", "columns": ["age"], "bins": 0}])),
            kind: PipelineKind::FeatureEngineering,
        });

        let job = runner.wait_for(id, Duration::from_secs(30)).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("Binning"));
    }

    #[test]
    fn test_preview_stops_after_upto_and_persists_nothing() {
        let (runner, store) = runner();
        let outcome = runner
            .preview(
                &input(),
                steps(json!([
                    {"type": "remove_duplicates"},
                    {"type": "drop_columns", "columns": ["city"]},
                ])),
                Some(0),
            )
            .unwrap();

        assert_eq!(outcome.change_metadata.len(), 1);
        assert_eq!(outcome.output, None);
        assert!(outcome.column_summary.removed.is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(runner.tracker().len(), 0);
    }

    #[test]
    fn test_column_summary() {
        let (runner, _) = runner();
        let outcome = runner
            .preview(
                &input(),
                steps(json!([
                    {"type": "drop_columns", "columns": ["city"]},
                    {"type": "encoding", "columns": ["name"], "method": "one_hot"},
                ])),
                None,
            )
            .unwrap();

        assert_eq!(outcome.column_summary.removed, vec!["name", "city"]);
        assert_eq!(outcome.column_summary.added, vec!["name_ann", "name_bob", "name_cid"]);
    }

    #[test]
    fn test_suggestions_run_as_a_pipeline() {
        let (runner, store) = runner();
        let suggestions = runner.suggest(&input()).unwrap();

        assert_eq!(suggestions.quality_summary.duplicate_rows, 1);
        assert_eq!(suggestions.quality_summary.rows_with_missing, 2);
        let names: Vec<&str> = suggestions.pipeline().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Remove Duplicates", "Fill Nulls"]);
        assert_eq!(runner.tracker().len(), 0);
        assert_eq!(store.len(), 1);

        let id = runner.submit(RunRequest {
            input: input(),
            steps: suggestions.pipeline(),
            kind: PipelineKind::Preprocessing,
        });
        let job = runner.wait_for(id, Duration::from_secs(30)).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let outcome = job.result.unwrap();
        assert_eq!(outcome.transformed_row_count, 3);
        assert_eq!(outcome.diff.deleted_row_indices, vec![2]);
    }

    #[test]
    fn test_analyze_profiles_input() {
        let (runner, _) = runner();
        let analysis = runner.analyze(&input()).unwrap();

        assert_eq!(analysis.filename, "people.csv");
        assert_eq!(analysis.total_rows, 4);
        let age = analysis
            .column_insights
            .iter()
            .find(|c| c.name == "age")
            .unwrap();
        assert!(age.is_numeric);
        assert_eq!(age.missing_count, 1);
    }

    #[test]
    fn test_manifests_use_configured_bucket() {
        let (runner, store) = runner();
        let run = runner.manifests().create(None, None, None).unwrap();

        assert_eq!(runner.manifests().bucket(), "training-results");
        assert!(store.contains(
            "training-results",
            &crate::manifest::manifest_key(run.run_id)
        ));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
