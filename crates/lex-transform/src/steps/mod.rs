//! Transformation steps and pipelines.
//!
//! A step is a named, stateless, pure function from a [`Dataset`] to a new
//! dataset plus a [`ChangeMetadata`] record. Steps are configured through
//! [`StepConfig`], a tagged union with one variant per built-in step:
//!
//! ```json
//! [
//!   {"type": "remove_duplicates", "subset": ["email"]},
//!   {"type": "fill_nulls", "strategies": {"age": {"strategy": "mean"}}},
//!   {"type": "encoding", "columns": ["city"], "method": "one_hot"}
//! ]
//! ```
//!
//! A [`Pipeline`] is an ordered, validated list of step configurations. Any
//! malformed or unknown step is rejected when the pipeline is built, before
//! a single row is touched.
//!
//! Steps that default to "every column" never include the row identity
//! column, and no step may remove or rewrite it.

pub mod binning;
pub mod cleaning;
pub mod creation;
pub mod encoding;
pub mod imputation;
pub mod metadata;
pub mod outliers;
pub mod scaling;
pub mod selection;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{DEFAULT_MAX_ONE_HOT_CARDINALITY, EngineConfig};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::utils::is_numeric_dtype;

pub use binning::{Binning, BinningMethod};
pub use cleaning::{DropColumns, RemoveDuplicates, RemoveNulls};
pub use creation::{AggregationType, CreationMethod, FeatureCreation};
pub use encoding::{Encoding, EncodingMethod};
pub use imputation::{FillNulls, FillSpec, FillStrategy};
pub use metadata::ChangeMetadata;
pub use outliers::{OutlierMethod, RemoveOutliers};
pub use scaling::{Scaling, ScalingMethod};
pub use selection::{FeatureSelection, SelectionMethod};

/// Settings shared by every step of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    /// Distinct-value count above which one-hot encoding becomes label encoding
    pub max_one_hot_cardinality: usize,
}

impl Default for StepContext {
    fn default() -> Self {
        Self {
            max_one_hot_cardinality: DEFAULT_MAX_ONE_HOT_CARDINALITY,
        }
    }
}

impl From<&EngineConfig> for StepContext {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_one_hot_cardinality: config.max_one_hot_cardinality,
        }
    }
}

/// A transformation step.
pub trait Step: Send + Sync {
    /// Operation name recorded in [`ChangeMetadata`].
    fn name(&self) -> &'static str;

    /// Check the configuration without looking at data.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Apply the step. The input is left untouched.
    fn apply(&self, dataset: &Dataset, ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)>;
}

/// Configuration of one built-in step, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    RemoveDuplicates(RemoveDuplicates),
    RemoveNulls(RemoveNulls),
    FillNulls(FillNulls),
    DropColumns(DropColumns),
    RemoveOutliers(RemoveOutliers),
    Scaling(Scaling),
    Encoding(Encoding),
    Binning(Binning),
    FeatureCreation(FeatureCreation),
    FeatureSelection(FeatureSelection),
}

impl StepConfig {
    /// The step behind this configuration.
    pub fn step(&self) -> &dyn Step {
        match self {
            Self::RemoveDuplicates(s) => s,
            Self::RemoveNulls(s) => s,
            Self::FillNulls(s) => s,
            Self::DropColumns(s) => s,
            Self::RemoveOutliers(s) => s,
            Self::Scaling(s) => s,
            Self::Encoding(s) => s,
            Self::Binning(s) => s,
            Self::FeatureCreation(s) => s,
            Self::FeatureSelection(s) => s,
        }
    }

    pub fn name(&self) -> &'static str {
        self.step().name()
    }
}

/// An ordered, validated list of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Pipeline {
    steps: Vec<StepConfig>,
}

impl Pipeline {
    /// Validate every step and build the pipeline.
    pub fn new(steps: Vec<StepConfig>) -> Result<Self> {
        for (i, step) in steps.iter().enumerate() {
            step.step().validate().map_err(|e| {
                let reason = match e {
                    EngineError::InvalidConfig(reason) => reason,
                    other => other.to_string(),
                };
                EngineError::InvalidConfig(format!("step {} ({}): {}", i + 1, step.name(), reason))
            })?;
        }
        Ok(Self { steps })
    }

    /// Parse loosely-typed JSON into a pipeline.
    ///
    /// Accepts either an array of steps or an object with a `steps` array.
    /// An unknown step type or a malformed field is an
    /// [`EngineError::InvalidConfig`].
    pub fn from_json(value: Value) -> Result<Self> {
        Self::new(parse_steps(value)?)
    }

    pub fn steps(&self) -> &[StepConfig] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Parse a JSON step list without validating step semantics.
pub fn parse_steps(value: Value) -> Result<Vec<StepConfig>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(EngineError::InvalidConfig(
                    "expected an array of steps or an object with a 'steps' array".to_string(),
                ));
            }
        },
        other => {
            return Err(EngineError::InvalidConfig(format!(
                "expected an array of steps, found {}",
                other
            )));
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<StepConfig>(item)
                .map_err(|e| EngineError::InvalidConfig(format!("step {}: {}", i + 1, e)))
        })
        .collect()
}

// =============================================================================
// Helpers shared by the built-in steps
// =============================================================================

/// Keep the rows whose `keep` flag is set.
pub(crate) fn filter_rows(dataset: &Dataset, keep: &[bool]) -> Result<Dataset> {
    let mask = BooleanChunked::from_slice("mask".into(), keep);
    Ok(Dataset::derived(dataset.frame().filter(&mask)?))
}

/// Numeric data columns (identity column excluded), in frame order.
pub(crate) fn numeric_columns(dataset: &Dataset) -> Vec<String> {
    dataset
        .data_columns()
        .into_iter()
        .filter(|name| {
            dataset
                .series(name)
                .map(|s| is_numeric_dtype(s.dtype()))
                .unwrap_or(false)
        })
        .collect()
}

/// Require that every named column exists.
pub(crate) fn require_columns(dataset: &Dataset, columns: &[String]) -> Result<()> {
    match columns.iter().find(|c| !dataset.has_column(c)) {
        Some(missing) => Err(EngineError::ColumnNotFound(missing.clone())),
        None => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_array_of_steps() {
        let pipeline = Pipeline::from_json(json!([
            {"type": "remove_duplicates"},
            {"type": "fill_nulls", "strategies": {"x": {"strategy": "mean"}}},
            {"type": "drop_columns", "columns": ["tmp"]},
        ]))
        .unwrap();

        assert_eq!(pipeline.len(), 3);
        let names: Vec<_> = pipeline.steps().iter().map(StepConfig::name).collect();
        assert_eq!(names, vec!["Remove Duplicates", "Fill Nulls", "Drop Columns"]);
    }

    #[test]
    fn test_parse_object_with_steps() {
        let pipeline = Pipeline::from_json(json!({"steps": [{"type": "remove_nulls"}]})).unwrap();
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_unknown_step_type_is_configuration_error() {
        let err = Pipeline::from_json(json!([
            {"type": "remove_duplicates"},
            {"type": "teleport_rows"},
        ]))
        .unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("step 2"));
    }

    #[test]
    fn test_malformed_field_is_configuration_error() {
        let err = Pipeline::from_json(json!([
            {"type": "binning", "columns": ["a"], "method": "quantile", "bins": "five"}
        ]))
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_semantic_validation_runs_at_construction() {
        let err = Pipeline::from_json(json!([
            {"type": "binning", "columns": ["a"], "method": "quantile", "bins": 0}
        ]))
        .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Binning"));
    }

    #[test]
    fn test_pipeline_serializes_as_step_list() {
        let pipeline = Pipeline::new(vec![StepConfig::DropColumns(DropColumns {
            columns: vec!["a".to_string()],
        })])
        .unwrap();

        assert_eq!(
            serde_json::to_value(&pipeline).unwrap(),
            json!([{"type": "drop_columns", "columns": ["a"]}])
        );
    }
}
