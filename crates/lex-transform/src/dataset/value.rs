//! Cell-level value handling.
//!
//! [`CellValue`] is the normalized form used for equality when diffing and
//! for duplicate detection. The JSON helpers turn frames into preview rows
//! for clients.

use polars::prelude::*;
use serde_json::{Map, Number, Value};

use crate::utils::is_temporal_dtype;

/// A cell normalized for comparison.
///
/// Every missing-like value (null, NaN, ±inf) collapses to [`CellValue::Missing`],
/// every integer and float width becomes [`CellValue::Number`], and
/// temporal values become their canonical text. Lists normalize element-wise.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Missing,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<CellValue>),
}

impl CellValue {
    /// Normalize a polars value.
    pub fn from_any(value: &AnyValue) -> Self {
        match value {
            AnyValue::Null => Self::Missing,
            AnyValue::Boolean(b) => Self::Bool(*b),
            AnyValue::Int8(v) => Self::Number(*v as f64),
            AnyValue::Int16(v) => Self::Number(*v as f64),
            AnyValue::Int32(v) => Self::Number(*v as f64),
            AnyValue::Int64(v) => Self::Number(*v as f64),
            AnyValue::UInt8(v) => Self::Number(*v as f64),
            AnyValue::UInt16(v) => Self::Number(*v as f64),
            AnyValue::UInt32(v) => Self::Number(*v as f64),
            AnyValue::UInt64(v) => Self::Number(*v as f64),
            AnyValue::Float32(v) => Self::number(*v as f64),
            AnyValue::Float64(v) => Self::number(*v),
            AnyValue::String(s) => Self::Text(s.to_string()),
            AnyValue::StringOwned(s) => Self::Text(s.to_string()),
            AnyValue::List(inner) => Self::List(
                (0..inner.len())
                    .map(|i| {
                        inner
                            .get(i)
                            .map(|v| Self::from_any(&v))
                            .unwrap_or(Self::Missing)
                    })
                    .collect(),
            ),
            other if is_temporal_dtype(&other.dtype()) => Self::Text(other.to_string()),
            other => match other.extract::<f64>() {
                Some(v) => Self::number(v),
                None => Self::Text(other.to_string()),
            },
        }
    }

    fn number(v: f64) -> Self {
        if v.is_finite() {
            Self::Number(v)
        } else {
            Self::Missing
        }
    }

    /// Whether this is the missing sentinel.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// A hashable key with the same equality as `CellValue`.
    ///
    /// Numbers are keyed by their bit pattern after folding `-0.0` into `0.0`.
    pub fn key(&self) -> CellKey {
        match self {
            Self::Missing => CellKey::Missing,
            Self::Bool(b) => CellKey::Bool(*b),
            Self::Number(v) => CellKey::Number(if *v == 0.0 { 0 } else { v.to_bits() }),
            Self::Text(s) => CellKey::Text(s.clone()),
            Self::List(items) => CellKey::List(items.iter().map(Self::key).collect()),
        }
    }
}

/// Hashable counterpart of [`CellValue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Missing,
    Bool(bool),
    Number(u64),
    Text(String),
    List(Vec<CellKey>),
}

/// Normalize every cell of a series.
pub fn normalize_series(series: &Series) -> PolarsResult<Vec<CellValue>> {
    (0..series.len())
        .map(|i| series.get(i).map(|v| CellValue::from_any(&v)))
        .collect()
}

/// Convert a polars value to JSON for previews.
pub fn any_value_to_json(value: &AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),

        AnyValue::Int8(i) => Value::Number((*i).into()),
        AnyValue::Int16(i) => Value::Number((*i).into()),
        AnyValue::Int32(i) => Value::Number((*i).into()),
        AnyValue::Int64(i) => Value::Number((*i).into()),

        AnyValue::UInt8(u) => Value::Number((*u).into()),
        AnyValue::UInt16(u) => Value::Number((*u).into()),
        AnyValue::UInt32(u) => Value::Number((*u).into()),
        AnyValue::UInt64(u) => Value::Number((*u).into()),

        // NaN/Infinity becomes null
        AnyValue::Float32(f) => Number::from_f64(*f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),

        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),

        AnyValue::List(inner) => Value::Array(
            (0..inner.len())
                .map(|i| {
                    inner
                        .get(i)
                        .map(|v| any_value_to_json(&v))
                        .unwrap_or(Value::Null)
                })
                .collect(),
        ),

        other => Value::String(other.to_string()),
    }
}

/// Convert the first `limit` rows of a frame into JSON objects keyed by
/// column name.
pub fn frame_to_rows(df: &DataFrame, limit: Option<usize>) -> PolarsResult<Vec<Map<String, Value>>> {
    let height = limit.map_or(df.height(), |n| n.min(df.height()));
    let mut rows = vec![Map::with_capacity(df.width()); height];

    for column in df.get_columns() {
        let series = column.as_materialized_series();
        let name = series.name().to_string();
        for (i, row) in rows.iter_mut().enumerate() {
            row.insert(name.clone(), any_value_to_json(&series.get(i)?));
        }
    }

    Ok(rows)
}
