//! Feature selection over numeric columns.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ChangeMetadata, Step, StepContext, numeric_columns};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::utils::{numeric_values, population_variance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Keep columns whose population variance exceeds the threshold
    #[default]
    VarianceThreshold,
    /// Drop a column whose |Pearson r| with an earlier column exceeds the threshold
    CorrelationFilter,
    /// Accepted by the parser, rejected by validation
    Pca,
}

impl SelectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VarianceThreshold => "variance_threshold",
            Self::CorrelationFilter => "correlation_filter",
            Self::Pca => "pca",
        }
    }
}

/// Drop numeric columns by variance or pairwise correlation.
///
/// An empty `columns` list means every numeric column. Listed columns that
/// are missing or not numeric are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelection {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: SelectionMethod,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_components: Option<usize>,
}

impl Step for FeatureSelection {
    fn name(&self) -> &'static str {
        "Feature Selection"
    }

    fn validate(&self) -> Result<()> {
        if self.method == SelectionMethod::Pca {
            return Err(EngineError::InvalidConfig(
                "pca feature selection is not supported".to_string(),
            ));
        }
        match self.threshold {
            Some(t) if t.is_finite() => Ok(()),
            Some(t) => Err(EngineError::InvalidConfig(format!(
                "threshold must be a finite number, got {}",
                t
            ))),
            None => Err(EngineError::InvalidConfig(format!(
                "threshold is required for {}",
                self.method.as_str()
            ))),
        }
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        self.validate()?;
        let threshold = self.threshold.unwrap_or_default();
        let mut meta =
            ChangeMetadata::new(self.name()).with("method", json!(self.method.as_str()));

        let numeric = numeric_columns(dataset);
        let candidates: Vec<String> = if self.columns.is_empty() {
            numeric
        } else {
            self.columns
                .iter()
                .filter(|c| numeric.contains(c))
                .cloned()
                .collect()
        };

        if candidates.is_empty() {
            meta.insert(
                "details",
                json!({"info": "No applicable numeric columns found for selection."}),
            );
            return Ok((dataset.clone(), meta));
        }

        let values = candidates
            .iter()
            .map(|c| Ok(numeric_values(dataset.series(c)?)?))
            .collect::<Result<Vec<_>>>()?;

        let to_drop: Vec<String> = match self.method {
            SelectionMethod::CorrelationFilter => {
                if candidates.len() < 2 {
                    meta.insert(
                        "details",
                        json!({"info": "Not enough numerical columns for correlation filter."}),
                    );
                    return Ok((dataset.clone(), meta));
                }
                let dropped: Vec<String> = (1..candidates.len())
                    .filter(|&j| {
                        (0..j).any(|i| {
                            pearson(&values[i], &values[j]).is_some_and(|r| r.abs() > threshold)
                        })
                    })
                    .map(|j| candidates[j].clone())
                    .collect();
                meta.insert(
                    "details",
                    json!({"dropped_columns": dropped, "threshold": threshold}),
                );
                dropped
            }
            SelectionMethod::VarianceThreshold => {
                let (kept, dropped): (Vec<_>, Vec<_>) =
                    candidates.iter().zip(&values).partition(|(_, v)| {
                        let present: Vec<f64> = v.iter().flatten().copied().collect();
                        population_variance(&present).is_some_and(|var| var > threshold)
                    });
                if kept.is_empty() {
                    return Err(EngineError::step(
                        self.name(),
                        format!("no column has variance above {}", threshold),
                    ));
                }
                let kept: Vec<&String> = kept.into_iter().map(|(c, _)| c).collect();
                meta.insert(
                    "details",
                    json!({"selected_columns": kept, "threshold": threshold}),
                );
                dropped.into_iter().map(|(c, _)| c.clone()).collect()
            }
            SelectionMethod::Pca => {
                return Err(EngineError::InvalidConfig(
                    "pca feature selection is not supported".to_string(),
                ));
            }
        };

        let mut frame = dataset.frame().clone();
        for column in &to_drop {
            frame = frame.drop(column)?;
        }
        debug!("Feature selection dropped {:?}", to_drop);
        Ok((Dataset::derived(frame), meta))
    }
}

/// Pearson correlation over rows where both values are present.
fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    let denom = (var_a * var_b).sqrt();
    (denom > 0.0).then(|| cov / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::fixtures::dataset;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn selection(method: SelectionMethod, threshold: f64) -> FeatureSelection {
        FeatureSelection {
            columns: Vec::new(),
            method,
            threshold: Some(threshold),
            n_components: None,
        }
    }

    #[test]
    fn test_correlation_filter_drops_later_column() {
        let ds = dataset(df! {
            "a" => &[1.0f64, 2.0, 3.0, 4.0],
            "b" => &[2.0f64, 4.0, 6.0, 8.0],
            "c" => &[4.0f64, 1.0, 3.0, 2.0],
            "s" => &["w", "x", "y", "z"],
        });

        let (out, meta) = selection(SelectionMethod::CorrelationFilter, 0.9)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.data_columns(), vec!["a", "c", "s"]);
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"dropped_columns": ["b"], "threshold": 0.9}))
        );
    }

    #[test]
    fn test_correlation_filter_needs_two_columns() {
        let ds = dataset(df! { "a" => &[1.0f64, 2.0] });

        let (out, meta) = selection(SelectionMethod::CorrelationFilter, 0.5)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.data_columns(), vec!["a"]);
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"info": "Not enough numerical columns for correlation filter."}))
        );
    }

    #[test]
    fn test_variance_threshold_keeps_order() {
        let ds = dataset(df! {
            "flat" => &[1.0f64, 1.0, 1.0],
            "wide" => &[0.0f64, 10.0, 20.0],
            "narrow" => &[0.0f64, 1.0, 2.0],
        });

        let (out, meta) = selection(SelectionMethod::VarianceThreshold, 0.5)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.data_columns(), vec!["wide", "narrow"]);
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"selected_columns": ["wide", "narrow"], "threshold": 0.5}))
        );
    }

    #[test]
    fn test_variance_threshold_removing_everything_fails() {
        let ds = dataset(df! { "flat" => &[3i64, 3, 3] });
        let err = selection(SelectionMethod::VarianceThreshold, 0.0)
            .apply(&ds, &StepContext::default())
            .unwrap_err();
        assert_eq!(err.error_code(), "STEP_FAILED");
    }

    #[test]
    fn test_no_applicable_columns() {
        let ds = dataset(df! { "s" => &["x", "y"] });
        let mut step = selection(SelectionMethod::VarianceThreshold, 0.1);
        step.columns = vec!["s".to_string()];

        let (_, meta) = step.apply(&ds, &StepContext::default()).unwrap();
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"info": "No applicable numeric columns found for selection."}))
        );
    }

    #[test]
    fn test_pca_and_missing_threshold_are_rejected() {
        assert!(selection(SelectionMethod::Pca, 0.5).validate().is_err());
        let step = FeatureSelection {
            method: SelectionMethod::CorrelationFilter,
            ..Default::default()
        };
        assert!(step.validate().unwrap_err().is_configuration());
    }
}
