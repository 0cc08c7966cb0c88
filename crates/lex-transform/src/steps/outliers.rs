//! Outlier removal.
//!
//! Bounds are computed per column on the rayon pool and merged in column
//! order. A row is kept only if every targeted column's value lies within
//! its bounds; missing values always pass.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{ChangeMetadata, Step, StepContext, filter_rows, numeric_columns};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::utils::{mean, numeric_values, population_std, quantile_sorted, sorted};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    /// Keep values in [Q1 - f*IQR, Q3 + f*IQR]
    #[default]
    Iqr,
    /// Keep values within f population standard deviations of the mean
    Zscore,
}

impl OutlierMethod {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Iqr => "IQR",
            Self::Zscore => "Z-Score",
        }
    }
}

fn default_factor() -> f64 {
    1.5
}

/// Drop rows with outlying values in numeric columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveOutliers {
    #[serde(default)]
    pub method: OutlierMethod,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Defaults to every numeric column; non-numeric names are ignored
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Default for RemoveOutliers {
    fn default() -> Self {
        Self {
            method: OutlierMethod::default(),
            factor: default_factor(),
            columns: None,
        }
    }
}

impl Step for RemoveOutliers {
    fn name(&self) -> &'static str {
        "Remove Outliers"
    }

    fn validate(&self) -> Result<()> {
        if !self.factor.is_finite() || self.factor < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "factor must be a non-negative number, got {}",
                self.factor
            )));
        }
        Ok(())
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let numeric = numeric_columns(dataset);
        let targets: Vec<String> = match &self.columns {
            Some(requested) if !requested.is_empty() => requested
                .iter()
                .filter(|c| numeric.contains(c))
                .cloned()
                .collect(),
            _ => numeric,
        };

        let mut meta = ChangeMetadata::new(self.name())
            .with("method", json!(self.method.display_name()))
            .with("factor", json!(self.factor))
            .with("columns", json!(targets));

        if targets.is_empty() {
            meta.insert("rows_removed", json!(0));
            meta.insert("bounds", json!({}));
            meta.insert("info", json!("no numeric columns to process"));
            return Ok((dataset.clone(), meta));
        }

        let per_column = targets
            .par_iter()
            .map(|column| self.column_mask(dataset, column))
            .collect::<Vec<Result<_>>>();

        let mut keep = vec![true; dataset.height()];
        let mut bounds = Map::new();
        for (column, item) in targets.iter().zip(per_column) {
            let (mask, info) = item?;
            for (flag, ok) in keep.iter_mut().zip(mask) {
                *flag &= ok;
            }
            bounds.insert(column.clone(), info);
        }

        let output = filter_rows(dataset, &keep)?;
        let removed = dataset.height() - output.height();
        debug!(
            "Removed {} outlier rows across {} columns ({})",
            removed,
            targets.len(),
            self.method.display_name()
        );

        meta.insert("rows_removed", json!(removed));
        meta.insert("bounds", Value::Object(bounds));
        Ok((output, meta))
    }
}

impl RemoveOutliers {
    /// Keep-mask and bound description for one column.
    fn column_mask(&self, dataset: &Dataset, column: &str) -> Result<(Vec<bool>, Value)> {
        let values = numeric_values(dataset.series(column)?)?;
        let present: Vec<f64> = values.iter().flatten().copied().collect();

        match self.method {
            OutlierMethod::Iqr => {
                let sorted = sorted(&present);
                let (Some(q1), Some(q3)) =
                    (quantile_sorted(&sorted, 0.25), quantile_sorted(&sorted, 0.75))
                else {
                    return Ok((
                        vec![true; values.len()],
                        json!({"lower": null, "upper": null}),
                    ));
                };
                let iqr = q3 - q1;
                let lower = q1 - self.factor * iqr;
                let upper = q3 + self.factor * iqr;
                let mask = values
                    .iter()
                    .map(|v| v.is_none_or(|x| x >= lower && x <= upper))
                    .collect();
                Ok((mask, json!({"lower": lower, "upper": upper})))
            }
            OutlierMethod::Zscore => {
                let mu = mean(&present);
                let sigma = population_std(&present);
                let info = json!({
                    "z_threshold": self.factor,
                    "mean": mu.unwrap_or(0.0),
                    "std": sigma.unwrap_or(0.0),
                });

                // Zero or undefined spread keeps every row.
                let (Some(mu), Some(sigma)) = (mu, sigma) else {
                    return Ok((vec![true; values.len()], info));
                };
                if sigma == 0.0 || sigma.is_nan() {
                    return Ok((vec![true; values.len()], info));
                }

                let mask = values
                    .iter()
                    .map(|v| v.is_none_or(|x| ((x - mu) / sigma).abs() <= self.factor))
                    .collect();
                Ok((mask, info))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::fixtures::{dataset, f64_values};
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_iqr_removes_only_extreme_value() {
        let ds = dataset(df! { "v" => &[1i64, 2, 3, 4, 100] });

        let (out, meta) = RemoveOutliers::default()
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.row_ids().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(meta.rows_removed(), Some(1));
        assert_eq!(
            meta.fact("bounds"),
            Some(&json!({"v": {"lower": -1.0, "upper": 7.0}}))
        );
        assert_eq!(meta.fact("method"), Some(&json!("IQR")));
    }

    #[test]
    fn test_missing_values_always_pass() {
        let ds = dataset(df! { "v" => &[Some(1.0f64), None, Some(2.0), Some(3.0), Some(1000.0)] });

        let (out, _) = RemoveOutliers::default()
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(f64_values(&out, "v"), vec![Some(1.0), None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_zscore_filters_by_std() {
        let ds = dataset(df! { "v" => &[10.0f64, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 50.0] });
        let step = RemoveOutliers {
            method: OutlierMethod::Zscore,
            factor: 2.0,
            columns: None,
        };

        let (out, meta) = step.apply(&ds, &StepContext::default()).unwrap();

        assert_eq!(out.height(), 9);
        assert_eq!(meta.fact("method"), Some(&json!("Z-Score")));
    }

    #[test]
    fn test_zscore_zero_std_keeps_all() {
        let ds = dataset(df! { "v" => &[5i64, 5, 5] });
        let step = RemoveOutliers {
            method: OutlierMethod::Zscore,
            factor: 0.1,
            columns: None,
        };

        let (out, meta) = step.apply(&ds, &StepContext::default()).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(meta.rows_removed(), Some(0));
    }

    #[test]
    fn test_row_removed_if_any_column_is_outlier() {
        let ds = dataset(df! {
            "a" => &[1i64, 2, 3, 4, 100, 2],
            "b" => &[1i64, 2, 3, 4, 2, -100],
            "label" => &["x", "y", "z", "w", "v", "u"],
        });

        let (out, meta) = RemoveOutliers::default()
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.row_ids().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(meta.fact("columns"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_requested_non_numeric_columns_are_ignored() {
        let ds = dataset(df! {
            "label" => &["x", "y"],
        });
        let step = RemoveOutliers {
            columns: Some(vec!["label".to_string(), "ghost".to_string()]),
            ..Default::default()
        };

        let (out, meta) = step.apply(&ds, &StepContext::default()).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(meta.rows_removed(), Some(0));
        assert_eq!(meta.fact("columns"), Some(&json!([])));
    }

    #[test]
    fn test_negative_factor_is_rejected() {
        let step = RemoveOutliers {
            factor: -1.0,
            ..Default::default()
        };
        assert!(step.validate().is_err());
    }
}
