//! Cleaning suggestions derived from a dataset's quality profile.
//!
//! Each data column is profiled on the rayon pool. Duplicate and
//! missing-row checks then run over the normalized cells, so they agree with
//! what `remove_duplicates` and `remove_nulls` would do.

use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::dataset::Dataset;
use crate::dataset::value::{CellKey, CellValue, normalize_series};
use crate::error::Result;
use crate::steps::{
    DropColumns, FillNulls, FillSpec, FillStrategy, OutlierMethod, RemoveDuplicates, RemoveNulls,
    RemoveOutliers, StepConfig,
};
use crate::utils::{
    is_numeric_dtype, is_temporal_dtype, numeric_values, quantile_sorted, sorted,
};

/// Missing share (percent) at which a column is proposed for dropping.
const DROP_MISSING_PERCENT: f64 = 80.0;

/// Distinct share at or below which a column counts as near-constant.
const NEAR_CONSTANT_RATIO: f64 = 0.01;

/// Share of rows with a missing cell at or below which rows are dropped
/// instead of imputed.
const SMALL_ROW_IMPACT_RATIO: f64 = 0.03;

/// Outlier share (percent) above which outlier removal is proposed.
const OUTLIER_PERCENT: f64 = 5.0;

const IQR_FACTOR: f64 = 1.5;

const MEAN_HINTS: [&str; 7] = ["avg", "average", "mean", "ratio", "rate", "score", "percent"];

const MEDIAN_HINTS: [&str; 10] = [
    "amount", "price", "cost", "age", "income", "duration", "value", "size", "weight", "distance",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MissingStat {
    pub count: usize,
    pub percentage: f64,
}

/// One proposed cleaning step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub enabled: bool,
    pub reason: String,
    pub step: StepConfig,
    /// Per-column explanations
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySummary {
    pub total_rows: usize,
    pub total_columns: usize,
    pub missing_data: BTreeMap<String, MissingStat>,
    pub duplicate_rows: usize,
    pub rows_with_missing: usize,
    /// IQR outlier share (percent of all rows) of numeric columns that have any
    pub outliers: BTreeMap<String, f64>,
    pub data_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreprocessingSuggestions {
    /// Duplicates, dropped columns, fill, remove nulls, outliers; in that order
    pub suggestions: Vec<Suggestion>,
    pub quality_summary: QualitySummary,
}

impl PreprocessingSuggestions {
    /// The enabled suggestions as a runnable step list.
    pub fn pipeline(&self) -> Vec<StepConfig> {
        self.suggestions
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.step.clone())
            .collect()
    }

    /// The suggestion for the step with display name `name`.
    pub fn find(&self, name: &str) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.step.name() == name)
    }
}

struct ColumnProfile {
    name: String,
    dtype: DataType,
    cells: Vec<CellValue>,
    missing: usize,
    distinct: usize,
    outlier_percent: Option<f64>,
}

fn profile_column(dataset: &Dataset, name: &str) -> Result<ColumnProfile> {
    let series = dataset.series(name)?;
    let cells = normalize_series(series)?;
    let missing = cells.iter().filter(|c| c.is_missing()).count();
    let distinct = cells
        .iter()
        .filter(|c| !c.is_missing())
        .map(CellValue::key)
        .collect::<HashSet<_>>()
        .len();
    let outlier_percent = if is_numeric_dtype(series.dtype()) {
        iqr_outlier_percent(&numeric_values(series)?)
    } else {
        None
    };

    Ok(ColumnProfile {
        name: name.to_string(),
        dtype: series.dtype().clone(),
        cells,
        missing,
        distinct,
        outlier_percent,
    })
}

/// Share of all rows, missing ones included, outside the 1.5 IQR fences.
fn iqr_outlier_percent(values: &[Option<f64>]) -> Option<f64> {
    let present = sorted(&values.iter().flatten().copied().collect::<Vec<_>>());
    let q1 = quantile_sorted(&present, 0.25)?;
    let q3 = quantile_sorted(&present, 0.75)?;
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - IQR_FACTOR * iqr, q3 + IQR_FACTOR * iqr);
    let outside = present.iter().filter(|v| **v < lower || **v > upper).count();
    Some(outside as f64 * 100.0 / values.len() as f64)
}

fn count_duplicate_rows(profiles: &[ColumnProfile], rows: usize) -> usize {
    if profiles.is_empty() {
        return 0;
    }
    let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(rows);
    (0..rows)
        .filter(|&row| !seen.insert(profiles.iter().map(|p| p.cells[row].key()).collect()))
        .count()
}

/// Fill strategy for a column, from its dtype and name.
fn infer_fill_strategy(name: &str, dtype: &DataType) -> (FillStrategy, &'static str) {
    if is_temporal_dtype(dtype) || matches!(dtype, DataType::Boolean) {
        return (
            FillStrategy::Mode,
            "Temporal and boolean fields take the most frequent value",
        );
    }
    if is_numeric_dtype(dtype) {
        let lower = name.to_lowercase();
        if MEAN_HINTS.iter().any(|h| lower.contains(h)) {
            return (
                FillStrategy::Mean,
                "Rate or score-like values; the mean preserves scale",
            );
        }
        if MEDIAN_HINTS.iter().any(|h| lower.contains(h)) {
            return (
                FillStrategy::Median,
                "Magnitude-like values; the median resists outliers",
            );
        }
        return (FillStrategy::Median, "Default robust numeric imputation");
    }
    (
        FillStrategy::Mode,
        "Categorical text takes the most frequent entry",
    )
}

/// Profile `dataset` and propose cleaning steps.
pub fn suggest_preprocessing(dataset: &Dataset) -> Result<PreprocessingSuggestions> {
    let total_rows = dataset.height();
    let profiles = dataset
        .data_columns()
        .par_iter()
        .map(|name| profile_column(dataset, name))
        .collect::<Result<Vec<_>>>()?;

    let percent = |count: usize| {
        if total_rows == 0 {
            0.0
        } else {
            count as f64 * 100.0 / total_rows as f64
        }
    };

    let duplicate_rows = count_duplicate_rows(&profiles, total_rows);
    let rows_with_missing = (0..total_rows)
        .filter(|&row| profiles.iter().any(|p| p.cells[row].is_missing()))
        .count();

    let missing_data: BTreeMap<String, MissingStat> = profiles
        .iter()
        .filter(|p| p.missing > 0)
        .map(|p| {
            let stat = MissingStat {
                count: p.missing,
                percentage: percent(p.missing),
            };
            (p.name.clone(), stat)
        })
        .collect();

    let mut drop_columns = Vec::new();
    let mut drop_details = BTreeMap::new();
    for p in &profiles {
        let missing_pct = percent(p.missing);
        let reason = if p.missing > 0 && missing_pct >= DROP_MISSING_PERCENT {
            format!("{:.1}% missing", missing_pct)
        } else if total_rows > 0 && p.distinct as f64 / total_rows as f64 <= NEAR_CONSTANT_RATIO {
            "Near-constant (<=1% unique)".to_string()
        } else {
            continue;
        };
        drop_columns.push(p.name.clone());
        drop_details.insert(p.name.clone(), reason);
    }

    let small_row_impact =
        total_rows > 0 && rows_with_missing as f64 / total_rows as f64 <= SMALL_ROW_IMPACT_RATIO;

    let mut fill_columns = Vec::new();
    let mut strategies = BTreeMap::new();
    let mut fill_details = BTreeMap::new();
    for p in profiles
        .iter()
        .filter(|p| p.missing > 0 && !drop_columns.contains(&p.name))
    {
        let (strategy, reason) = infer_fill_strategy(&p.name, &p.dtype);
        fill_columns.push(p.name.clone());
        strategies.insert(
            p.name.clone(),
            FillSpec {
                strategy,
                value: None,
            },
        );
        fill_details.insert(p.name.clone(), reason.to_string());
    }

    let outliers: BTreeMap<String, f64> = profiles
        .iter()
        .filter_map(|p| {
            p.outlier_percent
                .filter(|pct| *pct > 0.0)
                .map(|pct| (p.name.clone(), pct))
        })
        .collect();
    let outlier_columns: Vec<String> = profiles
        .iter()
        .filter(|p| p.outlier_percent.is_some_and(|pct| pct > OUTLIER_PERCENT))
        .filter(|p| !drop_columns.contains(&p.name))
        .map(|p| p.name.clone())
        .collect();
    let outlier_details = outlier_columns
        .iter()
        .map(|c| (c.clone(), format!("{:.1}% outside the IQR fences", outliers[c])))
        .collect();

    let suggestions = vec![
        Suggestion {
            enabled: duplicate_rows > 0,
            reason: if duplicate_rows > 0 {
                format!("Found {} duplicate rows", duplicate_rows)
            } else {
                "No duplicates".to_string()
            },
            step: StepConfig::RemoveDuplicates(RemoveDuplicates::default()),
            details: BTreeMap::new(),
        },
        Suggestion {
            enabled: !drop_columns.is_empty(),
            reason: "Columns with heavy missingness or near-constant values".to_string(),
            step: StepConfig::DropColumns(DropColumns {
                columns: drop_columns,
            }),
            details: drop_details,
        },
        Suggestion {
            enabled: !fill_columns.is_empty() && !small_row_impact,
            reason: "Missing values detected; imputation preferred over row removal".to_string(),
            step: StepConfig::FillNulls(FillNulls { strategies }),
            details: fill_details,
        },
        Suggestion {
            enabled: small_row_impact && rows_with_missing > 0,
            reason: if small_row_impact {
                "Few rows contain nulls; dropping them has low impact".to_string()
            } else {
                "Row removal would be costly".to_string()
            },
            step: StepConfig::RemoveNulls(RemoveNulls {
                columns: small_row_impact.then_some(fill_columns),
            }),
            details: BTreeMap::new(),
        },
        Suggestion {
            enabled: !outlier_columns.is_empty(),
            reason: if outlier_columns.is_empty() {
                "No significant outliers".to_string()
            } else {
                "Outliers above 5% in some numeric columns".to_string()
            },
            step: StepConfig::RemoveOutliers(RemoveOutliers {
                method: OutlierMethod::Iqr,
                factor: IQR_FACTOR,
                columns: Some(outlier_columns),
            }),
            details: outlier_details,
        },
    ];

    debug!(
        "Profiled {} columns: {} duplicate rows, {} rows with missing values",
        profiles.len(),
        duplicate_rows,
        rows_with_missing
    );

    Ok(PreprocessingSuggestions {
        suggestions,
        quality_summary: QualitySummary {
            total_rows,
            total_columns: profiles.len(),
            missing_data,
            duplicate_rows,
            rows_with_missing,
            outliers,
            data_types: profiles
                .iter()
                .map(|p| (p.name.clone(), p.dtype.to_string()))
                .collect(),
        },
    })
}
