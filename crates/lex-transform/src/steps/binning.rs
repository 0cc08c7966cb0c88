//! Discretization of numeric columns into `<col>_binned` labels.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::{ChangeMetadata, Step, StepContext};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::utils::{is_numeric_dtype, numeric_values, quantile_sorted, sorted};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningMethod {
    /// Equal-width intervals between min and max
    #[default]
    #[serde(alias = "equal-width")]
    EqualWidth,
    /// Intervals holding roughly equal counts
    Quantile,
}

impl BinningMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EqualWidth => "equal_width",
            Self::Quantile => "quantile",
        }
    }
}

fn default_bins() -> usize {
    5
}

/// Add a `<col>_binned` label column (0-based) per listed numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: BinningMethod,
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default)]
    pub column_methods: Option<BTreeMap<String, BinningMethod>>,
}

impl Default for Binning {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            method: BinningMethod::default(),
            bins: default_bins(),
            column_methods: None,
        }
    }
}

impl Step for Binning {
    fn name(&self) -> &'static str {
        "Binning"
    }

    fn validate(&self) -> Result<()> {
        if self.bins == 0 {
            return Err(EngineError::InvalidConfig(
                "bins must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        self.validate()?;
        let mut meta = ChangeMetadata::new(self.name())
            .with("method", json!(self.method.as_str()))
            .with("columns", json!(self.columns))
            .with("bins", json!(self.bins));
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

            let values = numeric_values(series)?;
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            let edges = match method {
                BinningMethod::EqualWidth => equal_width_edges(&present, self.bins),
                BinningMethod::Quantile => quantile_edges(&present, self.bins),
            };

            let labels: Vec<Option<i64>> = values
                .iter()
                .map(|v| v.map(|x| bin_index(&edges, x)))
                .collect();
            let name = format!("{}_binned", column);
            frame.with_column(Series::new(name.as_str().into(), labels))?;

            let note = match method {
                BinningMethod::EqualWidth => "equal-width binned",
                BinningMethod::Quantile => "quantile binned",
            };
            meta.detail(column, note);
        }

        Ok((Dataset::derived(frame), meta))
    }
}

/// `bins + 1` evenly spaced edges. A constant column is widened by 0.1%
/// on each side so it still spans `bins` intervals.
fn equal_width_edges(present: &[f64], bins: usize) -> Vec<f64> {
    if present.is_empty() {
        return Vec::new();
    }
    let mut min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let mut max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        min -= if min != 0.0 { 0.001 * min.abs() } else { 0.001 };
        max += if max != 0.0 { 0.001 * max.abs() } else { 0.001 };
    }
    let step = (max - min) / bins as f64;
    (0..=bins).map(|i| min + step * i as f64).collect()
}

/// Quantile edges with duplicates removed.
fn quantile_edges(present: &[f64], bins: usize) -> Vec<f64> {
    let sorted = sorted(present);
    let mut edges: Vec<f64> = (0..=bins)
        .filter_map(|i| quantile_sorted(&sorted, i as f64 / bins as f64))
        .collect();
    edges.dedup();
    edges
}

/// Label of the right-closed interval containing `x`; the lowest edge is
/// included in the first interval. Fewer than two edges means one bin.
fn bin_index(edges: &[f64], x: f64) -> i64 {
    if edges.len() < 2 {
        return 0;
    }
    let last = edges.len() - 2;
    edges[1..].partition_point(|e| *e < x).min(last) as i64
}
