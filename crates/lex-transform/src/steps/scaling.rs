//! Numeric scaling.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::{ChangeMetadata, Step, StepContext};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::utils::{is_numeric_dtype, mean, numeric_values, population_std, quantile_sorted, sorted};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingMethod {
    /// (x - mean) / std
    #[default]
    Standard,
    /// (x - min) / (max - min)
    Minmax,
    /// (x - median) / IQR
    Robust,
    /// ln(1 + max(x, 0))
    Log,
}

impl ScalingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Minmax => "minmax",
            Self::Robust => "robust",
            Self::Log => "log",
        }
    }
}

/// Scale numeric columns in place. Missing values stay missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: ScalingMethod,
    /// Per-column overrides of `method`
    #[serde(default)]
    pub column_methods: Option<BTreeMap<String, ScalingMethod>>,
}

impl Step for Scaling {
    fn name(&self) -> &'static str {
        "Scaling"
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let mut meta = ChangeMetadata::new(self.name())
            .with("method", json!(self.method.as_str()))
            .with("columns", json!(self.columns));
        let mut frame = dataset.frame().clone();

        for column in &self.columns {
            let Ok(series) = dataset.series(column) else {
                meta.detail(column, "skipped (column not found)");
                continue;
            };
            if !is_numeric_dtype(series.dtype()) {
                meta.detail(column, "skipped (non-numeric)");
                continue;
            }

            let method = self
                .column_methods
                .as_ref()
                .and_then(|m| m.get(column))
                .copied()
                .unwrap_or(self.method);

            let scaled = scale(&numeric_values(series)?, method);
            frame.with_column(Series::new(column.as_str().into(), scaled))?;

            let note = match method {
                ScalingMethod::Log => "log1p transformation applied".to_string(),
                other => format!("scaled ({})", other.as_str()),
            };
            meta.detail(column, note);
        }

        Ok((Dataset::derived(frame), meta))
    }
}

/// Apply a scaling method. A zero spread is treated as 1, so constant
/// columns map to 0.
fn scale(values: &[Option<f64>], method: ScalingMethod) -> Vec<Option<f64>> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let non_zero = |s: f64| if s == 0.0 || !s.is_finite() { 1.0 } else { s };

    let (center, spread) = match method {
        ScalingMethod::Log => {
            return values
                .iter()
                .map(|v| v.map(|x| x.max(0.0).ln_1p()))
                .collect();
        }
        ScalingMethod::Standard => (
            mean(&present).unwrap_or(0.0),
            non_zero(population_std(&present).unwrap_or(1.0)),
        ),
        ScalingMethod::Minmax => {
            let min = present.iter().copied().fold(f64::INFINITY, f64::min);
            let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if present.is_empty() {
                (0.0, 1.0)
            } else {
                (min, non_zero(max - min))
            }
        }
        ScalingMethod::Robust => {
            let sorted = sorted(&present);
            let median = quantile_sorted(&sorted, 0.5).unwrap_or(0.0);
            let iqr = match (quantile_sorted(&sorted, 0.25), quantile_sorted(&sorted, 0.75)) {
                (Some(q1), Some(q3)) => q3 - q1,
                _ => 1.0,
            };
            (median, non_zero(iqr))
        }
    };

    values
        .iter()
        .map(|v| v.map(|x| (x - center) / spread))
        .collect()
}
