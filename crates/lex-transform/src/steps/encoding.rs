//! Categorical encoding.
//!
//! Only text-like columns (String, Categorical, Enum) are encoded; other
//! columns are reported as skipped. Encoded codes are assigned over the
//! sorted distinct values, so the same data always encodes the same way.
//!
//! One-hot encoding of a column with more distinct values than the
//! configured cardinality limit is downgraded to label encoding. The
//! downgrade is logged and recorded in the `downgraded` fact.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use super::{ChangeMetadata, Step, StepContext};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::utils::{is_categorical_dtype, is_numeric_dtype, numeric_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMethod {
    /// One UInt8 indicator column per distinct value
    #[default]
    #[serde(alias = "one-hot", alias = "onehot")]
    OneHot,
    /// Integer code per distinct value, written in place
    Label,
    /// Mean of the target column per distinct value
    Target,
}

impl EncodingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHot => "one_hot",
            Self::Label => "label",
            Self::Target => "target",
        }
    }
}

fn default_target_column() -> String {
    "target".to_string()
}

/// Encode categorical columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub method: EncodingMethod,
    /// Per-column overrides of `method`
    #[serde(default)]
    pub column_methods: Option<BTreeMap<String, EncodingMethod>>,
    /// Numeric column averaged by target encoding
    #[serde(default = "default_target_column")]
    pub target_column: String,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            method: EncodingMethod::default(),
            column_methods: None,
            target_column: default_target_column(),
        }
    }
}

/// Cell text, with nulls preserved.
fn text_values(series: &Series) -> PolarsResult<Vec<Option<String>>> {
    let strings = series.cast(&DataType::String)?;
    Ok(strings
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

impl Step for Encoding {
    fn name(&self) -> &'static str {
        "Encoding"
    }

    fn apply(&self, dataset: &Dataset, ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let mut meta = ChangeMetadata::new(self.name())
            .with("method", json!(self.method.as_str()))
            .with("columns", json!(self.columns));
        let mut frame = dataset.frame().clone();
        let mut downgraded = Vec::new();

        for column in &self.columns {
            let Ok(series) = dataset.series(column) else {
                meta.detail(column, "skipped (column not found)");
                continue;
            };
            if !is_categorical_dtype(series.dtype()) {
                meta.detail(column, "skipped (non-categorical)");
                continue;
            }

            let values = text_values(series)?;
            let classes: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();

            let mut method = self
                .column_methods
                .as_ref()
                .and_then(|m| m.get(column))
                .copied()
                .unwrap_or(self.method);

            if method == EncodingMethod::OneHot && classes.len() > ctx.max_one_hot_cardinality {
                warn!(
                    "Column '{}' has {} distinct values (limit {}), using label encoding instead of one-hot",
                    column,
                    classes.len(),
                    ctx.max_one_hot_cardinality
                );
                downgraded.push(json!({
                    "column": column,
                    "distinct_values": classes.len(),
                    "from": EncodingMethod::OneHot.as_str(),
                    "to": EncodingMethod::Label.as_str(),
                }));
                method = EncodingMethod::Label;
            }

            match method {
                EncodingMethod::OneHot => {
                    for class in &classes {
                        let indicator: Vec<u8> = values
                            .iter()
                            .map(|v| u8::from(v.as_deref() == Some(*class)))
                            .collect();
                        let name = format!("{}_{}", column, class);
                        frame.with_column(Series::new(name.as_str().into(), indicator))?;
                    }
                    frame = frame.drop(column)?;
                    meta.detail(column, "one-hot encoded");
                }
                EncodingMethod::Label => {
                    let codes: HashMap<&str, i64> = classes
                        .iter()
                        .enumerate()
                        .map(|(code, class)| (*class, code as i64))
                        .collect();
                    let encoded: Vec<Option<i64>> = values
                        .iter()
                        .map(|v| v.as_deref().and_then(|s| codes.get(s).copied()))
                        .collect();
                    frame.with_column(Series::new(column.as_str().into(), encoded))?;
                    let note = if downgraded.iter().any(|d| d["column"] == json!(column)) {
                        "label encoded (too many categories for one-hot)"
                    } else {
                        "label encoded"
                    };
                    meta.detail(column, note);
                }
                EncodingMethod::Target => {
                    let Some(target) = self.target_values(dataset)? else {
                        meta.detail(column, "target encoding skipped (no target column)");
                        continue;
                    };
                    let encoded = target_means(&values, &target);
                    let name = format!("{}_target_encoded", column);
                    frame.with_column(Series::new(name.as_str().into(), encoded))?;
                    frame = frame.drop(column)?;
                    meta.detail(column, "target encoded (simplified)");
                }
            }
            debug!("Encoded column '{}' with {}", column, method.as_str());
        }

        meta.insert("downgraded", Value::Array(downgraded));
        Ok((Dataset::derived(frame), meta))
    }
}

impl Encoding {
    /// Values of the target column, or `None` if it is absent or not numeric.
    fn target_values(&self, dataset: &Dataset) -> Result<Option<Vec<Option<f64>>>> {
        match dataset.series(&self.target_column) {
            Ok(series) if is_numeric_dtype(series.dtype()) => Ok(Some(numeric_values(series)?)),
            _ => Ok(None),
        }
    }
}

/// Per-category mean of `target`, broadcast back to each row.
fn target_means(values: &[Option<String>], target: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
    for (value, t) in values.iter().zip(target) {
        if let (Some(v), Some(t)) = (value, t) {
            let entry = sums.entry(v.as_str()).or_insert((0.0, 0));
            entry.0 += t;
            entry.1 += 1;
        }
    }

    values
        .iter()
        .map(|v| {
            let (sum, n) = sums.get(v.as_deref()?)?;
            (*n > 0).then(|| sum / *n as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::fixtures::{dataset, f64_values, i64_values};
    use pretty_assertions::assert_eq;

    fn encoding(columns: &[&str], method: EncodingMethod) -> Encoding {
        Encoding {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            method,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_hot_replaces_column_with_indicators() {
        let ds = dataset(df! { "city" => &[Some("b"), Some("a"), None, Some("b")] });

        let (out, meta) = encoding(&["city"], EncodingMethod::OneHot)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.data_columns(), vec!["city_a".to_string(), "city_b".to_string()]);
        assert_eq!(i64_values(&out, "city_a"), vec![Some(0), Some(1), Some(0), Some(0)]);
        assert_eq!(i64_values(&out, "city_b"), vec![Some(1), Some(0), Some(0), Some(1)]);
        assert_eq!(out.series("city_a").unwrap().dtype(), &DataType::UInt8);
        assert_eq!(meta.fact("downgraded"), Some(&json!([])));
        assert_eq!(meta.fact("details"), Some(&json!({"city": "one-hot encoded"})));
    }

    #[test]
    fn test_label_codes_follow_sorted_classes() {
        let ds = dataset(df! { "size" => &[Some("m"), Some("l"), None, Some("s"), Some("m")] });

        let (out, _) = encoding(&["size"], EncodingMethod::Label)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(
            i64_values(&out, "size"),
            vec![Some(1), Some(0), None, Some(2), Some(1)]
        );
    }

    #[test]
    fn test_high_cardinality_one_hot_is_downgraded() {
        let ids: Vec<String> = (0..150).map(|i| format!("id{:03}", i)).collect();
        let ds = dataset(df! { "code" => ids });

        let (out, meta) = encoding(&["code"], EncodingMethod::OneHot)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert_eq!(out.data_columns(), vec!["code".to_string()]);
        assert_eq!(i64_values(&out, "code")[149], Some(149));
        assert_eq!(
            meta.fact("downgraded"),
            Some(&json!([{
                "column": "code",
                "distinct_values": 150,
                "from": "one_hot",
                "to": "label",
            }]))
        );
    }

    #[test]
    fn test_target_encoding_uses_group_mean() {
        let ds = dataset(df! {
            "color" => &["red", "blue", "red"],
            "target" => &[1.0f64, 5.0, 3.0],
        });

        let (out, meta) = encoding(&["color"], EncodingMethod::Target)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert!(!out.has_column("color"));
        assert_eq!(
            f64_values(&out, "color_target_encoded"),
            vec![Some(2.0), Some(5.0), Some(2.0)]
        );
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"color": "target encoded (simplified)"}))
        );
    }

    #[test]
    fn test_target_encoding_without_target_is_skipped() {
        let ds = dataset(df! { "color" => &["red", "blue"] });

        let (out, meta) = encoding(&["color"], EncodingMethod::Target)
            .apply(&ds, &StepContext::default())
            .unwrap();

        assert!(out.has_column("color"));
        assert_eq!(
            meta.fact("details"),
            Some(&json!({"color": "target encoding skipped (no target column)"}))
        );
    }

    #[test]
    fn test_non_categorical_and_overrides() {
        let ds = dataset(df! {
            "n" => &[1i64, 2],
            "a" => &["x", "y"],
            "b" => &["x", "y"],
        });
        let mut step = encoding(&["n", "a", "b"], EncodingMethod::OneHot);
        step.column_methods = Some([("b".to_string(), EncodingMethod::Label)].into());

        let (out, meta) = step.apply(&ds, &StepContext::default()).unwrap();

        assert!(out.has_column("a_x"));
        assert_eq!(i64_values(&out, "b"), vec![Some(0), Some(1)]);
        assert_eq!(
            meta.fact("details"),
            Some(&json!({
                "n": "skipped (non-categorical)",
                "a": "one-hot encoded",
                "b": "label encoded",
            }))
        );
    }

    #[test]
    fn test_method_accepts_hyphenated_alias() {
        let step: Encoding =
            serde_json::from_value(json!({"columns": ["a"], "method": "one-hot"})).unwrap();
        assert_eq!(step.method, EncodingMethod::OneHot);
        assert_eq!(step.target_column, "target");
    }
}
