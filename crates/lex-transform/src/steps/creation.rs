//! Derived feature columns: polynomial powers, datetime parts and
//! group aggregations.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use super::{ChangeMetadata, Step, StepContext, require_columns};
use crate::dataset::Dataset;
use crate::dataset::value::{CellKey, normalize_series};
use crate::error::{EngineError, Result};
use crate::utils::{is_numeric_dtype, numeric_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationMethod {
    /// `<col>^2` .. `<col>^degree`
    #[default]
    Polynomial,
    /// `<col>_year`, `_month`, `_day`, `_hour`, `_minute`, `_second`
    DatetimeDecomposition,
    /// First column groups, the rest are aggregated into `new_column_name`
    #[serde(alias = "aggregations")]
    Aggregation,
}

impl CreationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polynomial => "polynomial",
            Self::DatetimeDecomposition => "datetime_decomposition",
            Self::Aggregation => "aggregation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Reduce a set of present values. Empty input yields 0 for sum and
    /// count, nothing otherwise.
    fn reduce(&self, values: &[f64]) -> Option<f64> {
        match self {
            Self::Sum | Self::Count => Some(values.iter().sum()),
            Self::Mean => crate::utils::mean(values),
            Self::Min => values.iter().copied().reduce(f64::min),
            Self::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

/// Add derived feature columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCreation {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: CreationMethod,
    #[serde(default)]
    pub degree: Option<u32>,
    #[serde(default, alias = "aggregation")]
    pub aggregation_type: Option<AggregationType>,
    #[serde(default)]
    pub new_column_name: Option<String>,
}

impl Step for FeatureCreation {
    fn name(&self) -> &'static str {
        "Feature Creation"
    }

    fn validate(&self) -> Result<()> {
        match self.method {
            CreationMethod::Polynomial => match self.degree {
                Some(d) if d >= 1 => Ok(()),
                Some(d) => Err(EngineError::InvalidConfig(format!(
                    "degree must be at least 1, got {}",
                    d
                ))),
                None => Err(EngineError::InvalidConfig(
                    "degree is required for polynomial features".to_string(),
                )),
            },
            CreationMethod::DatetimeDecomposition => Ok(()),
            CreationMethod::Aggregation => {
                if self.aggregation_type.is_none() {
                    return Err(EngineError::InvalidConfig(
                        "aggregation_type is required for aggregations".to_string(),
                    ));
                }
                if self.new_column_name.as_deref().is_none_or(str::is_empty) {
                    return Err(EngineError::InvalidConfig(
                        "new_column_name is required for aggregations".to_string(),
                    ));
                }
                if self.columns.len() < 2 {
                    return Err(EngineError::InvalidConfig(
                        "aggregations need a group column and at least one value column"
                            .to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        self.validate()?;
        let mut meta = ChangeMetadata::new(self.name())
            .with("method", json!(self.method.as_str()))
            .with("columns", json!(self.columns));
        let mut frame = dataset.frame().clone();

        match self.method {
            CreationMethod::Polynomial => {
                let degree = self.degree.unwrap_or(1);
                for column in &self.columns {
                    self.add_powers(dataset, &mut frame, &mut meta, column, degree)?;
                }
            }
            CreationMethod::DatetimeDecomposition => {
                for column in &self.columns {
                    add_datetime_parts(dataset, &mut frame, &mut meta, column)?;
                }
            }
            CreationMethod::Aggregation => {
                self.add_aggregation(dataset, &mut frame, &mut meta)?;
            }
        }

        Ok((Dataset::derived(frame), meta))
    }
}

impl FeatureCreation {
    fn add_powers(
        &self,
        dataset: &Dataset,
        frame: &mut DataFrame,
        meta: &mut ChangeMetadata,
        column: &str,
        degree: u32,
    ) -> Result<()> {
        let Ok(series) = dataset.series(column) else {
            meta.detail(column, "skipped (column not found)");
            return Ok(());
        };
        if !is_numeric_dtype(series.dtype()) {
            meta.detail(column, "skipped (non-numeric)");
            return Ok(());
        }

        let values = numeric_values(series)?;
        if values.iter().all(Option::is_none) {
            meta.detail(column, "polynomial skipped (no data)");
            return Ok(());
        }

        for power in 2..=degree {
            let powered: Vec<Option<f64>> = values
                .iter()
                .map(|v| v.map(|x| x.powi(power as i32)))
                .collect();
            let name = format!("{}^{}", column, power);
            frame.with_column(Series::new(name.as_str().into(), powered))?;
        }
        meta.detail(column, format!("polynomial features (degree {})", degree));
        Ok(())
    }

    fn add_aggregation(
        &self,
        dataset: &Dataset,
        frame: &mut DataFrame,
        meta: &mut ChangeMetadata,
    ) -> Result<()> {
        let (Some(kind), Some(new_column)) = (self.aggregation_type, &self.new_column_name) else {
            return Err(EngineError::InvalidConfig(
                "aggregation_type and new_column_name are required".to_string(),
            ));
        };
        require_columns(dataset, &self.columns)?;
        let group_column = &self.columns[0];
        let value_columns = &self.columns[1..];

        let groups: Vec<CellKey> = normalize_series(dataset.series(group_column)?)?
            .iter()
            .map(|c| c.key())
            .collect();

        // One per-row group result per value column.
        let mut per_column: Vec<Vec<Option<f64>>> = Vec::with_capacity(value_columns.len());
        for column in value_columns {
            let series = dataset.series(column)?;
            let present: Vec<bool> = normalize_series(series)?
                .iter()
                .map(|c| !c.is_missing())
                .collect();

            let values: Vec<Option<f64>> = if kind == AggregationType::Count {
                present.iter().map(|p| p.then_some(1.0)).collect()
            } else if is_numeric_dtype(series.dtype()) {
                numeric_values(series)?
            } else {
                return Err(EngineError::step(
                    self.name(),
                    format!(
                        "cannot compute {} of non-numeric column '{}'",
                        kind.as_str(),
                        column
                    ),
                ));
            };

            let mut buckets: HashMap<&CellKey, Vec<f64>> = HashMap::new();
            for (key, value) in groups.iter().zip(&values) {
                if *key == CellKey::Missing {
                    continue;
                }
                let bucket = buckets.entry(key).or_default();
                if let Some(v) = value {
                    bucket.push(*v);
                }
            }
            let reduced: HashMap<&CellKey, Option<f64>> = buckets
                .iter()
                .map(|(key, values)| (*key, kind.reduce(values)))
                .collect();

            per_column.push(
                groups
                    .iter()
                    .map(|key| reduced.get(key).copied().flatten())
                    .collect(),
            );
        }

        // Row-wise combination: counts add up, other kinds re-apply themselves.
        let combine = match kind {
            AggregationType::Count => AggregationType::Sum,
            other => other,
        };
        let combined: Vec<Option<f64>> = (0..dataset.height())
            .map(|row| {
                if groups[row] == CellKey::Missing {
                    return None;
                }
                let row_values: Vec<f64> = per_column.iter().filter_map(|col| col[row]).collect();
                combine.reduce(&row_values)
            })
            .collect();

        let series = if kind == AggregationType::Count {
            let counts: Vec<Option<i64>> = combined.iter().map(|v| v.map(|c| c as i64)).collect();
            Series::new(new_column.as_str().into(), counts)
        } else {
            Series::new(new_column.as_str().into(), combined)
        };
        frame.with_column(series)?;

        debug!(
            "Added aggregation column '{}' ({} of {:?} by '{}')",
            new_column,
            kind.as_str(),
            value_columns,
            group_column
        );
        meta.insert(
            "details",
            json!({
                "aggregation": {
                    "group": group_column,
                    "values": value_columns,
                    "type": kind.as_str(),
                    "new_col": new_column,
                }
            }),
        );
        Ok(())
    }
}

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Parse a timestamp written in one of the common layouts.
fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn add_datetime_parts(
    dataset: &Dataset,
    frame: &mut DataFrame,
    meta: &mut ChangeMetadata,
    column: &str,
) -> Result<()> {
    let Ok(series) = dataset.series(column) else {
        meta.detail(column, "skipped (column not found)");
        return Ok(());
    };

    let strings = series.cast(&DataType::String)?;
    let parsed: Vec<Option<NaiveDateTime>> = strings
        .str()?
        .into_iter()
        .map(|v| v.and_then(parse_datetime))
        .collect();

    if parsed.iter().all(Option::is_none) {
        meta.detail(column, "skipped (no parseable dates)");
        return Ok(());
    }

    let parts: [(&str, fn(&NaiveDateTime) -> i64); 6] = [
        ("year", |d| i64::from(d.year())),
        ("month", |d| i64::from(d.month())),
        ("day", |d| i64::from(d.day())),
        ("hour", |d| i64::from(d.hour())),
        ("minute", |d| i64::from(d.minute())),
        ("second", |d| i64::from(d.second())),
    ];
    for (suffix, part) in parts {
        let values: Vec<Option<i64>> = parsed.iter().map(|d| d.as_ref().map(part)).collect();
        let name = format!("{}_{}", column, suffix);
        frame.with_column(Series::new(name.as_str().into(), values))?;
    }
    meta.detail(column, "datetime decomposed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::fixtures::{dataset, f64_values, i64_values};
    use pretty_assertions::assert_eq;

    fn ctx() -> StepContext {
        StepContext::default()
    }

    #[test]
    fn test_polynomial_powers_keep_missing() {
        let ds = dataset(df! { "x" => &[Some(2.0f64), None, Some(-3.0)] });
        let step = FeatureCreation {
            columns: vec!["x".to_string()],
            method: CreationMethod::Polynomial,
            degree: Some(3),
            ..Default::default()
        };

        let (out, meta) = step.apply(&ds, &ctx()).unwrap();

        assert_eq!(f64_values(&out, "x^2"), vec![Some(4.0), None, Some(9.0)]);
        assert_eq!(f64_values(&out, "x^3"), vec![Some(8.0), None, Some(-27.0)]);
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"x": "polynomial features (degree 3)"}))
        );
    }

    #[test]
    fn test_polynomial_requires_degree() {
        let step = FeatureCreation {
            columns: vec!["x".to_string()],
            method: CreationMethod::Polynomial,
            ..Default::default()
        };
        assert!(step.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_datetime_decomposition() {
        let ds = dataset(df! {
            "when" => &[Some("2024-03-05 13:45:10"), Some("2023-12-31"), None, Some("garbage")],
        });
        let step = FeatureCreation {
            columns: vec!["when".to_string()],
            method: CreationMethod::DatetimeDecomposition,
            ..Default::default()
        };

        let (out, meta) = step.apply(&ds, &ctx()).unwrap();

        assert_eq!(i64_values(&out, "when_year"), vec![Some(2024), Some(2023), None, None]);
        assert_eq!(i64_values(&out, "when_month"), vec![Some(3), Some(12), None, None]);
        assert_eq!(i64_values(&out, "when_hour"), vec![Some(13), Some(0), None, None]);
        assert_eq!(i64_values(&out, "when_second"), vec![Some(10), Some(0), None, None]);
        assert_eq!(meta.fact("details"), Some(&json!({"when": "datetime decomposed"})));
    }

    #[test]
    fn test_aggregation_by_group() {
        let ds = dataset(df! {
            "team" => &[Some("a"), Some("b"), Some("a"), None],
            "points" => &[Some(1.0f64), Some(10.0), Some(3.0), Some(7.0)],
        });
        let step = FeatureCreation {
            columns: vec!["team".to_string(), "points".to_string()],
            method: CreationMethod::Aggregation,
            aggregation_type: Some(AggregationType::Mean),
            new_column_name: Some("team_points".to_string()),
            ..Default::default()
        };

        let (out, meta) = step.apply(&ds, &ctx()).unwrap();

        assert_eq!(
            f64_values(&out, "team_points"),
            vec![Some(2.0), Some(10.0), Some(2.0), None]
        );
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"aggregation": {
                "group": "team",
                "values": ["points"],
                "type": "mean",
                "new_col": "team_points",
            }}))
        );
    }

    #[test]
    fn test_count_aggregation_sums_across_value_columns() {
        let ds = dataset(df! {
            "g" => &["x", "x", "y"],
            "a" => &[Some(1i64), None, Some(3)],
            "b" => &[Some("p"), Some("q"), None],
        });
        let step = FeatureCreation {
            columns: vec!["g".to_string(), "a".to_string(), "b".to_string()],
            method: CreationMethod::Aggregation,
            aggregation_type: Some(AggregationType::Count),
            new_column_name: Some("n".to_string()),
            ..Default::default()
        };

        let (out, _) = step.apply(&ds, &ctx()).unwrap();
        assert_eq!(i64_values(&out, "n"), vec![Some(3), Some(3), Some(1)]);
    }

    #[test]
    fn test_aggregation_config_is_checked() {
        let parsed: FeatureCreation = serde_json::from_value(json!({
            "columns": ["g"],
            "method": "aggregations",
            "aggregation": "sum",
            "new_column_name": "total",
        }))
        .unwrap();
        assert_eq!(parsed.aggregation_type, Some(AggregationType::Sum));
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_aggregation_of_text_is_step_failure() {
        let ds = dataset(df! {
            "g" => &["x", "y"],
            "s" => &["p", "q"],
        });
        let step = FeatureCreation {
            columns: vec!["g".to_string(), "s".to_string()],
            method: CreationMethod::Aggregation,
            aggregation_type: Some(AggregationType::Sum),
            new_column_name: Some("total".to_string()),
            ..Default::default()
        };
        assert_eq!(step.apply(&ds, &ctx()).unwrap_err().error_code(), "STEP_FAILED");
    }
}
