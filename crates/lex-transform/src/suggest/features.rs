//! Feature engineering recommendations.
//!
//! Columns are profiled in full (no sampling), then a fixed rule set turns
//! the profiles into recommended steps. The suggested pipeline orders those
//! steps as encoding, scaling, feature creation, binning, feature selection.

use polars::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::dataset::Dataset;
use crate::dataset::value::{CellValue, normalize_series};
use crate::error::Result;
use crate::steps::{
    Binning, CreationMethod, Encoding, EncodingMethod, FeatureCreation, FeatureSelection, Scaling,
    ScalingMethod, SelectionMethod, StepConfig, StepContext,
};
use crate::utils::{is_categorical_dtype, is_numeric_dtype, mean, present_values, sample_std};

const TOP_VALUES: usize = 10;

/// Smallest cardinality at which a categorical column is worth encoding.
const MIN_ENCODING_CARDINALITY: usize = 5;

/// Range above which a numeric column is proposed for binning.
const BINNING_RANGE: f64 = 100.0;

const POLYNOMIAL_COLUMNS: usize = 3;
const SELECTION_COLUMNS: usize = 5;

/// Column count above which feature selection is proposed.
const SELECTION_MIN_COLUMNS: usize = 10;

const HIGH_MISSING_PERCENT: f64 = 30.0;
const HIGH_CARDINALITY_NOTE: usize = 50;
const ID_CARDINALITY: usize = 1000;

/// Profile of one data column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInsight {
    pub name: String,
    pub dtype: String,
    /// Distinct non-missing values
    pub cardinality: usize,
    pub missing_count: usize,
    pub missing_percentage: f64,
    pub is_numeric: bool,
    pub is_categorical: bool,
    pub is_datetime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_value: Option<f64>,
    /// Sample standard deviation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_value: Option<f64>,
    /// First distinct values of a categorical column, in row order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unique_values: Vec<String>,
}

impl ColumnInsight {
    fn range(&self) -> Option<f64> {
        Some(self.max_value? - self.min_value?)
    }

    fn is_skewed(&self) -> bool {
        match (self.min_value, self.max_value, self.mean_value, self.std_value) {
            (Some(min), Some(max), Some(m), Some(std)) if std > 0.0 => {
                (m - min).abs() > 3.0 * std || (max - m).abs() > 3.0 * std
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecommendation {
    pub step_name: String,
    pub reason: String,
    pub compatibility_score: f64,
    pub why_these_columns: BTreeMap<String, String>,
    pub step: StepConfig,
}

impl StepRecommendation {
    fn new(step_name: &str, reason: &str, score: f64, step: StepConfig) -> Self {
        Self {
            step_name: step_name.to_string(),
            reason: reason.to_string(),
            compatibility_score: score,
            why_these_columns: BTreeMap::new(),
            step,
        }
    }

    fn explain<'a>(mut self, columns: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        self.why_these_columns
            .extend(columns.into_iter().map(|(c, why)| (c.to_string(), why)));
        self
    }

    /// Position of this step's kind in a suggested pipeline.
    fn pipeline_rank(&self) -> u8 {
        match self.step {
            StepConfig::Encoding(_) => 1,
            StepConfig::Scaling(_) => 2,
            StepConfig::FeatureCreation(_) => 3,
            StepConfig::Binning(_) => 4,
            StepConfig::FeatureSelection(_) => 5,
            _ => u8::MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetAnalysis {
    pub filename: String,
    pub total_rows: usize,
    pub total_columns: usize,
    pub column_insights: Vec<ColumnInsight>,
    pub step_recommendations: Vec<StepRecommendation>,
    pub suggested_pipeline: Vec<StepConfig>,
    pub data_quality_notes: Vec<String>,
}

/// Profile one column over every row.
pub fn analyze_column(dataset: &Dataset, name: &str) -> Result<ColumnInsight> {
    let series = dataset.series(name)?;
    let dtype = series.dtype();
    let cells = normalize_series(series)?;
    let total = cells.len();

    let missing_count = cells.iter().filter(|c| c.is_missing()).count();
    let mut seen = HashSet::new();
    let distinct: Vec<&CellValue> = cells
        .iter()
        .filter(|c| !c.is_missing() && seen.insert(c.key()))
        .collect();

    let is_numeric = is_numeric_dtype(dtype);
    let is_categorical = is_categorical_dtype(dtype);
    let is_datetime = matches!(dtype, DataType::Date | DataType::Datetime(_, _));

    let mut insight = ColumnInsight {
        name: name.to_string(),
        dtype: dtype.to_string(),
        cardinality: distinct.len(),
        missing_count,
        missing_percentage: if total == 0 {
            0.0
        } else {
            missing_count as f64 * 100.0 / total as f64
        },
        is_numeric,
        is_categorical,
        is_datetime,
        min_value: None,
        max_value: None,
        mean_value: None,
        std_value: None,
        unique_values: Vec::new(),
    };

    if is_numeric {
        let values = present_values(series)?;
        insight.min_value = values.iter().copied().reduce(f64::min);
        insight.max_value = values.iter().copied().reduce(f64::max);
        insight.mean_value = mean(&values);
        insight.std_value = sample_std(&values);
    } else if is_categorical {
        insight.unique_values = distinct
            .iter()
            .take(TOP_VALUES)
            .map(|c| match c {
                CellValue::Text(s) => s.clone(),
                other => format!("{:?}", other),
            })
            .collect();
    }

    Ok(insight)
}

/// Recommended steps for a set of column profiles.
///
/// Categorical columns above `ctx.max_one_hot_cardinality` are recommended
/// for label encoding only.
pub fn recommend_steps(insights: &[ColumnInsight], ctx: &StepContext) -> Vec<StepRecommendation> {
    let mut recommendations = Vec::new();
    let max_one_hot = ctx.max_one_hot_cardinality;
    let names = |cols: &[&ColumnInsight]| -> Vec<String> { cols.iter().map(|c| c.name.clone()).collect() };

    let numeric: Vec<&ColumnInsight> = insights.iter().filter(|c| c.is_numeric).collect();

    let varying: Vec<&ColumnInsight> = numeric
        .iter()
        .copied()
        .filter(|c| c.std_value.is_some_and(|s| s > 0.0))
        .collect();
    if !varying.is_empty() {
        let step = StepConfig::Scaling(Scaling {
            columns: names(&varying),
            method: ScalingMethod::Standard,
            column_methods: None,
        });
        recommendations.push(
            StepRecommendation::new(
                "Scaling",
                "Normalize numeric features to the same scale",
                0.95,
                step,
            )
            .explain(
                varying
                    .iter()
                    .map(|c| (c.name.as_str(), "Numeric feature with variance".to_string())),
            ),
        );
    }

    let low_cardinality: Vec<&ColumnInsight> = insights
        .iter()
        .filter(|c| {
            c.is_categorical && (MIN_ENCODING_CARDINALITY..=max_one_hot).contains(&c.cardinality)
        })
        .collect();
    if !low_cardinality.is_empty() {
        let step = StepConfig::Encoding(Encoding {
            columns: names(&low_cardinality),
            method: EncodingMethod::OneHot,
            ..Encoding::default()
        });
        recommendations.push(
            StepRecommendation::new(
                "Encoding (Low-Cardinality Columns)",
                "Convert low-cardinality categorical columns to indicator columns",
                0.95,
                step,
            )
            .explain(low_cardinality.iter().map(|c| {
                let why = format!("Low-cardinality categorical feature ({} unique values)", c.cardinality);
                (c.name.as_str(), why)
            })),
        );
    }

    let high_cardinality: Vec<&ColumnInsight> = insights
        .iter()
        .filter(|c| c.is_categorical && c.cardinality > max_one_hot)
        .collect();
    if !high_cardinality.is_empty() {
        let step = StepConfig::Encoding(Encoding {
            columns: names(&high_cardinality),
            method: EncodingMethod::Label,
            ..Encoding::default()
        });
        recommendations.push(
            StepRecommendation::new(
                "Encoding (High-Cardinality, Label Only)",
                "These columns have many distinct values; one-hot encoding would explode the column count, so use label encoding",
                0.60,
                step,
            )
            .explain(high_cardinality.iter().map(|c| {
                let why = format!("High cardinality ({} unique values), label encoding only", c.cardinality);
                (c.name.as_str(), why)
            })),
        );
    }

    let wide: Vec<&ColumnInsight> = numeric
        .iter()
        .copied()
        .filter(|c| c.range().is_some_and(|r| r > BINNING_RANGE))
        .collect();
    if !wide.is_empty() {
        let step = StepConfig::Binning(Binning {
            columns: names(&wide),
            ..Binning::default()
        });
        recommendations.push(
            StepRecommendation::new(
                "Binning",
                "Convert continuous numeric features into discrete bins",
                0.75,
                step,
            )
            .explain(wide.iter().map(|c| {
                (c.name.as_str(), "Wide range numeric feature suitable for binning".to_string())
            })),
        );
    }

    if !numeric.is_empty() {
        let first = &numeric[..numeric.len().min(POLYNOMIAL_COLUMNS)];
        let step = StepConfig::FeatureCreation(FeatureCreation {
            columns: names(first),
            method: CreationMethod::Polynomial,
            degree: Some(2),
            ..FeatureCreation::default()
        });
        recommendations.push(
            StepRecommendation::new(
                "Polynomial Features",
                "Create polynomial features for non-linear relationships",
                0.80,
                step,
            )
            .explain(first.iter().map(|c| {
                (c.name.as_str(), "Numeric feature for polynomial expansion".to_string())
            })),
        );
    }

    let temporal: Vec<&ColumnInsight> = insights.iter().filter(|c| c.is_datetime).collect();
    if !temporal.is_empty() {
        let step = StepConfig::FeatureCreation(FeatureCreation {
            columns: names(&temporal),
            method: CreationMethod::DatetimeDecomposition,
            ..FeatureCreation::default()
        });
        recommendations.push(
            StepRecommendation::new(
                "DateTime Decomposition",
                "Extract year, month, day and time parts from datetime features",
                0.90,
                step,
            )
            .explain(temporal.iter().map(|c| {
                (c.name.as_str(), "DateTime feature for decomposition".to_string())
            })),
        );
    }

    if insights.len() > SELECTION_MIN_COLUMNS && !numeric.is_empty() {
        let first = &numeric[..numeric.len().min(SELECTION_COLUMNS)];
        let step = StepConfig::FeatureSelection(FeatureSelection {
            columns: names(first),
            method: SelectionMethod::VarianceThreshold,
            threshold: Some(0.0),
            n_components: None,
        });
        recommendations.push(
            StepRecommendation::new(
                "Feature Selection",
                "Remove low-variance features to reduce dimensionality",
                0.70,
                step,
            )
            .explain([(
                "all",
                "Dataset has many features, feature selection can improve the model".to_string(),
            )]),
        );
    }

    recommendations
}

/// Recommended steps in pipeline order. Steps of the same kind keep their
/// recommendation order.
pub fn suggested_pipeline(recommendations: &[StepRecommendation]) -> Vec<StepConfig> {
    let mut ranked: Vec<&StepRecommendation> = recommendations.iter().collect();
    ranked.sort_by_key(|r| r.pipeline_rank());
    ranked.into_iter().map(|r| r.step.clone()).collect()
}

/// Observations about data quality, or a single all-clear note.
pub fn data_quality_notes(insights: &[ColumnInsight]) -> Vec<String> {
    let mut notes = Vec::new();
    let listed = |cols: Vec<String>| cols.join(", ");
    let with_cardinality = |c: &ColumnInsight| format!("{} ({} unique)", c.name, c.cardinality);

    let high_missing: Vec<String> = insights
        .iter()
        .filter(|c| c.missing_percentage > HIGH_MISSING_PERCENT)
        .map(|c| c.name.clone())
        .collect();
    if !high_missing.is_empty() {
        notes.push(format!("High missing values (>30%): {}", listed(high_missing)));
    }

    let constant: Vec<String> = insights
        .iter()
        .filter(|c| c.cardinality == 1)
        .map(|c| c.name.clone())
        .collect();
    if !constant.is_empty() {
        notes.push(format!("Constant columns (no variance): {}", listed(constant)));
    }

    let identifiers: Vec<String> = insights
        .iter()
        .filter(|c| c.is_categorical && c.cardinality > ID_CARDINALITY)
        .map(with_cardinality)
        .collect();
    if !identifiers.is_empty() {
        notes.push(format!(
            "Likely identifier columns, consider dropping them: {}",
            listed(identifiers)
        ));
    }

    let high_cardinality: Vec<String> = insights
        .iter()
        .filter(|c| {
            c.is_categorical && c.cardinality > HIGH_CARDINALITY_NOTE && c.cardinality <= ID_CARDINALITY
        })
        .map(with_cardinality)
        .collect();
    if !high_cardinality.is_empty() {
        notes.push(format!(
            "High cardinality categorical columns (use label encoding, not one-hot): {}",
            listed(high_cardinality)
        ));
    }

    let skewed: Vec<String> = insights
        .iter()
        .filter(|c| c.is_skewed())
        .map(|c| c.name.clone())
        .collect();
    if !skewed.is_empty() {
        notes.push(format!(
            "Skewed numeric features (consider scaling or a transformation): {}",
            listed(skewed)
        ));
    }

    if notes.is_empty() {
        notes.push("Dataset looks good. No major data quality issues detected.".to_string());
    }
    notes
}

/// Profile every data column and recommend feature engineering steps.
pub fn analyze_features(
    dataset: &Dataset,
    filename: &str,
    ctx: &StepContext,
) -> Result<DatasetAnalysis> {
    let column_insights = dataset
        .data_columns()
        .par_iter()
        .map(|name| analyze_column(dataset, name))
        .collect::<Result<Vec<_>>>()?;

    let step_recommendations = recommend_steps(&column_insights, ctx);
    let suggested_pipeline = suggested_pipeline(&step_recommendations);
    let data_quality_notes = data_quality_notes(&column_insights);

    debug!(
        "Analyzed {} columns of '{}': {} recommendations",
        column_insights.len(),
        filename,
        step_recommendations.len()
    );

    Ok(DatasetAnalysis {
        filename: filename.to_string(),
        total_rows: dataset.height(),
        total_columns: column_insights.len(),
        column_insights,
        step_recommendations,
        suggested_pipeline,
        data_quality_notes,
    })
}
