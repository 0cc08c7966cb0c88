//! Sequential step execution.
//!
//! [`StepEngine::run`] applies a validated [`Pipeline`] to a dataset one
//! step at a time. Every step receives the previous step's output and the
//! caller's input is never modified, so an aborted run leaves nothing
//! half-applied.

use tracing::debug;

use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::runner::progress::{ProgressReporter, ProgressUpdate, RunStage};
use crate::steps::{ChangeMetadata, Pipeline, StepContext};

/// Output of a run.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub dataset: Dataset,
    /// One record per applied step, in call order
    pub change_metadata: Vec<ChangeMetadata>,
    pub steps_applied: usize,
}

/// Applies pipelines with a fixed [`StepContext`].
#[derive(Debug, Clone, Default)]
pub struct StepEngine {
    ctx: StepContext,
}

impl StepEngine {
    pub fn new(ctx: StepContext) -> Self {
        Self { ctx }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(StepContext::from(config))
    }

    pub fn context(&self) -> &StepContext {
        &self.ctx
    }

    /// Apply the pipeline's steps in order.
    ///
    /// With `upto = Some(n)` the run stops after the step at index `n`
    /// (0-based); an index past the end runs every step.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        dataset: &Dataset,
        upto: Option<usize>,
        reporter: &dyn ProgressReporter,
    ) -> Result<EngineOutput> {
        let limit = upto.map_or(pipeline.len(), |n| n.saturating_add(1).min(pipeline.len()));
        let steps = &pipeline.steps()[..limit];

        let mut current = dataset.clone();
        let mut change_metadata = Vec::with_capacity(steps.len());

        for (i, config) in steps.iter().enumerate() {
            let step = config.step();
            reporter.report(ProgressUpdate::with_items(
                RunStage::Transforming,
                step.name(),
                i,
                steps.len(),
                format!("Applying step {} of {}: {}", i + 1, steps.len(), step.name()),
            ));

            let label = format!("Step {} ({})", i + 1, step.name());
            let (next, meta) = step
                .apply(&current, &self.ctx)
                .map_err(|e| e.with_context(label.clone()))?;
            next.check_identity().map_err(|e| {
                EngineError::step(step.name(), format!("row identity check failed: {}", e))
                    .with_context(label.clone())
            })?;

            debug!(
                "{} done: {} -> {} rows, {} columns",
                label,
                current.height(),
                next.height(),
                next.frame().width()
            );
            change_metadata.push(meta);
            current = next;
        }

        reporter.report(ProgressUpdate::with_items(
            RunStage::Transforming,
            "done",
            steps.len(),
            steps.len(),
            format!("Applied {} steps", steps.len()),
        ));

        Ok(EngineOutput {
            dataset: current,
            change_metadata,
            steps_applied: steps.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::progress::{ClosureProgressReporter, NoopProgressReporter};
    use crate::steps::fixtures::{dataset, f64_values};
    use parking_lot::Mutex;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pipeline(value: serde_json::Value) -> Pipeline {
        Pipeline::from_json(value).unwrap()
    }

    fn sample() -> Dataset {
        dataset(df! {
            "x" => &[Some(1.0f64), Some(1.0), None, Some(4.0)],
            "tmp" => &["a", "a", "b", "c"],
        })
    }

    #[test]
    fn test_runs_steps_in_order() {
        let p = pipeline(json!([
            {"type": "remove_duplicates"},
            {"type": "fill_nulls", "strategies": {"x": {"strategy": "mean"}}},
            {"type": "drop_columns", "columns": ["tmp"]},
        ]));
        let input = sample();

        let out = StepEngine::default()
            .run(&p, &input, None, &NoopProgressReporter)
            .unwrap();

        assert_eq!(out.steps_applied, 3);
        let ops: Vec<_> = out.change_metadata.iter().map(|m| m.operation.as_str()).collect();
        assert_eq!(ops, vec!["Remove Duplicates", "Fill Nulls", "Drop Columns"]);
        assert_eq!(out.dataset.row_ids().unwrap(), vec![0, 2, 3]);
        assert_eq!(f64_values(&out.dataset, "x"), vec![Some(1.0), Some(2.5), Some(4.0)]);
        assert_eq!(out.dataset.data_columns(), vec!["x"]);
        // input untouched
        assert_eq!(input.height(), 4);
        assert!(input.has_column("tmp"));
    }

    #[test]
    fn test_upto_stops_after_index() {
        let p = pipeline(json!([
            {"type": "remove_duplicates"},
            {"type": "drop_columns", "columns": ["tmp"]},
        ]));

        let out = StepEngine::default()
            .run(&p, &sample(), Some(0), &NoopProgressReporter)
            .unwrap();

        assert_eq!(out.steps_applied, 1);
        assert!(out.dataset.has_column("tmp"));

        let all = StepEngine::default()
            .run(&p, &sample(), Some(10), &NoopProgressReporter)
            .unwrap();
        assert_eq!(all.steps_applied, 2);
    }

    #[test]
    fn test_failing_step_aborts_with_context() {
        let p = pipeline(json!([
            {"type": "drop_columns", "columns": ["tmp"]},
            {"type": "fill_nulls", "strategies": {"x": {"strategy": "mean"}}},
            {"type": "remove_duplicates", "subset": ["ghost"]},
        ]));

        let err = StepEngine::default()
            .run(&p, &sample(), None, &NoopProgressReporter)
            .unwrap_err();

        assert_eq!(err.error_code(), "COLUMN_NOT_FOUND");
        assert!(err.to_string().contains("Step 3 (Remove Duplicates)"));
    }

    #[test]
    fn test_progress_is_non_decreasing() {
        let seen = Mutex::new(Vec::new());
        let reporter = ClosureProgressReporter::new(|u: ProgressUpdate| seen.lock().push(u.progress));
        let p = pipeline(json!([
            {"type": "remove_duplicates"},
            {"type": "remove_nulls"},
        ]));

        StepEngine::default().run(&p, &sample(), None, &reporter).unwrap();

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(80.0));
    }
}
