//! Missing-value imputation.
//!
//! Each configured column resolves its own fill value from the current
//! data. Resolution is independent per column and runs on the rayon pool;
//! fills are then applied in column-name order.

use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::debug;

use super::{ChangeMetadata, Step, StepContext};
use crate::dataset::Dataset;
use crate::dataset::value::{CellValue, normalize_series};
use crate::error::{EngineError, Result};
use crate::utils::{first_mode, is_numeric_dtype, mean, median, numeric_values, present_values};

/// How a column's fill value is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStrategy {
    #[default]
    Mean,
    Median,
    /// Most frequent value; ties go to the value seen first
    Mode,
    /// The configured constant
    Custom,
}

impl FillStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::Custom => "custom",
        }
    }
}

/// Per-column fill configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillSpec {
    #[serde(default)]
    pub strategy: FillStrategy,
    /// Constant for [`FillStrategy::Custom`]; text, number or boolean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Fill missing values per column. Columns not in the dataset are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillNulls {
    #[serde(default)]
    pub strategies: BTreeMap<String, FillSpec>,
}

/// A resolved fill value.
#[derive(Debug, Clone, PartialEq)]
enum FillValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl FillValue {
    fn to_json(&self) -> Value {
        match self {
            Self::Number(v) => json!(v),
            Self::Text(s) => json!(s),
            Self::Bool(b) => json!(b),
        }
    }
}

impl Step for FillNulls {
    fn name(&self) -> &'static str {
        "Fill Nulls"
    }

    fn validate(&self) -> Result<()> {
        for (column, spec) in &self.strategies {
            if spec.strategy != FillStrategy::Custom {
                continue;
            }
            match &spec.value {
                None | Some(Value::Null) => {
                    return Err(EngineError::InvalidConfig(format!(
                        "custom fill for '{}' needs a value",
                        column
                    )));
                }
                Some(Value::Array(_)) | Some(Value::Object(_)) => {
                    return Err(EngineError::InvalidConfig(format!(
                        "custom fill for '{}' must be text, a number or a boolean",
                        column
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let targets: Vec<(&String, &FillSpec)> = self
            .strategies
            .iter()
            .filter(|(column, _)| dataset.has_column(column))
            .collect();

        let resolved = targets
            .par_iter()
            .map(|(column, spec)| resolve(dataset.series(column)?, spec).map(|v| (*column, *spec, v)))
            .collect::<Vec<Result<_>>>();

        let mut frame = dataset.frame().clone();
        let mut fills = Vec::with_capacity(resolved.len());

        for item in resolved {
            let (column, spec, value) = item?;
            let series = dataset.series(column)?;
            let (filled, count) = fill(series, &value)?;
            debug!("Filled {} missing values in '{}' with {:?}", count, column, value);
            frame.with_column(filled)?;

            fills.push(json!({
                "column": column,
                "strategy": spec.strategy.as_str(),
                "value": value.to_json(),
                "filled": count,
            }));
        }

        let meta = ChangeMetadata::new(self.name()).with("fills", Value::Array(fills));
        Ok((Dataset::derived(frame), meta))
    }
}

fn resolve(series: &Series, spec: &FillSpec) -> Result<FillValue> {
    let name = series.name().to_string();
    let numeric = is_numeric_dtype(series.dtype());

    match spec.strategy {
        FillStrategy::Mean | FillStrategy::Median => {
            if !numeric {
                return Err(EngineError::step(
                    "Fill Nulls",
                    format!(
                        "{} needs a numeric column, '{}' is {}",
                        spec.strategy.as_str(),
                        name,
                        series.dtype()
                    ),
                ));
            }
            let values = present_values(series)?;
            let stat = match spec.strategy {
                FillStrategy::Mean => mean(&values),
                _ => median(&values),
            };
            stat.map(FillValue::Number)
                .ok_or(EngineError::NoValidValues(name))
        }
        FillStrategy::Mode => {
            let cells = normalize_series(series)?;
            let modal = first_mode(cells.into_iter().filter(|c| !c.is_missing()), CellValue::key)
                .ok_or_else(|| EngineError::NoValidValues(name.clone()))?;
            match modal {
                CellValue::Number(v) => Ok(FillValue::Number(v)),
                CellValue::Bool(b) => Ok(FillValue::Bool(b)),
                CellValue::Text(s) => Ok(FillValue::Text(s)),
                CellValue::List(_) | CellValue::Missing => Err(EngineError::step(
                    "Fill Nulls",
                    format!("mode is not supported for list column '{}'", name),
                )),
            }
        }
        FillStrategy::Custom => Ok(custom_value(series.dtype(), spec.value.as_ref())),
    }
}

/// Interpret a configured constant against the column's type.
fn custom_value(dtype: &DataType, value: Option<&Value>) -> FillValue {
    let text = match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    if is_numeric_dtype(dtype) {
        let number = match value {
            Some(Value::Number(n)) => n.as_f64(),
            _ => text.trim().parse::<f64>().ok(),
        };
        if let Some(v) = number {
            return FillValue::Number(v);
        }
    }

    if dtype == &DataType::Boolean {
        let flag = match value {
            Some(Value::Bool(b)) => Some(*b),
            _ => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        };
        if let Some(b) = flag {
            return FillValue::Bool(b);
        }
    }

    FillValue::Text(text)
}

/// Fill missing cells; returns the new series and how many cells changed.
fn fill(series: &Series, value: &FillValue) -> Result<(Series, usize)> {
    let name = series.name().clone();

    match value {
        FillValue::Number(v) if is_numeric_dtype(series.dtype()) => {
            let values = numeric_values(series)?;
            let count = values.iter().filter(|x| x.is_none()).count();
            let filled: Vec<Option<f64>> = values.into_iter().map(|x| Some(x.unwrap_or(*v))).collect();
            Ok((Series::new(name, filled), count))
        }
        FillValue::Bool(b) if series.dtype() == &DataType::Boolean => {
            let count = series.null_count();
            let filled: Vec<Option<bool>> = series
                .bool()?
                .into_iter()
                .map(|x| Some(x.unwrap_or(*b)))
                .collect();
            Ok((Series::new(name, filled), count))
        }
        other => {
            let fill_text = match other {
                FillValue::Number(v) => v.to_string(),
                FillValue::Bool(b) => b.to_string(),
                FillValue::Text(s) => s.clone(),
            };
            let text = series.cast(&DataType::String)?;
            let count = text.null_count();
            let filled: Vec<Option<String>> = text
                .str()?
                .into_iter()
                .map(|x| Some(x.unwrap_or(&fill_text).to_string()))
                .collect();
            Ok((Series::new(name, filled), count))
        }
    }
}
