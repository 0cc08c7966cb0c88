//! Shared utilities for datasets and steps.
//!
//! Dtype checks, textual missing-value markers and the small statistics
//! kernels (mean, population std, interpolated quantiles, mode) that the
//! built-in steps share.

use polars::prelude::*;
use std::collections::HashMap;

// =============================================================================
// Data Type Utilities
// =============================================================================

/// Check if a DataType is numeric (integer or float).
#[inline]
pub fn is_numeric_dtype(dtype: &DataType) -> bool {
    is_integer_dtype(dtype) || matches!(dtype, DataType::Float32 | DataType::Float64)
}

/// Check if a DataType is an integer type.
#[inline]
pub fn is_integer_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

/// Check if a DataType is a date, datetime, time or duration type.
#[inline]
pub fn is_temporal_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Datetime(_, _) | DataType::Date | DataType::Time | DataType::Duration(_)
    )
}

/// Check if a DataType holds categories as text.
#[inline]
pub fn is_categorical_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::String | DataType::Categorical(..) | DataType::Enum(..)
    )
}

// =============================================================================
// Missing Value Markers
// =============================================================================

/// Textual markers that are read as missing values (compared case-insensitively
/// after trimming).
pub const MISSING_MARKERS: [&str; 8] = [
    "", "na", "n/a", "null", "none", "nan", "missing", "#n/a",
];

/// Check if a string is a missing value marker.
pub fn is_missing_marker(s: &str) -> bool {
    let lower = s.trim().to_ascii_lowercase();
    MISSING_MARKERS.iter().any(|&marker| lower == marker)
}

// =============================================================================
// Series Statistics Utilities
// =============================================================================

/// Values of a numeric series as `f64`, keeping missing positions as `None`.
///
/// NaN is treated as missing.
pub fn numeric_values(series: &Series) -> PolarsResult<Vec<Option<f64>>> {
    let floats = series.cast(&DataType::Float64)?;
    Ok(floats
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

/// Non-missing values of a numeric series, in row order.
pub fn present_values(series: &Series) -> PolarsResult<Vec<f64>> {
    Ok(numeric_values(series)?.into_iter().flatten().collect())
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance (ddof = 0); `None` for an empty slice.
pub fn population_variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (ddof = 0).
pub fn population_std(values: &[f64]) -> Option<f64> {
    population_variance(values).map(f64::sqrt)
}

/// Sample standard deviation (ddof = 1); `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Quantile with linear interpolation between closest ranks.
///
/// `sorted` must be ascending and free of NaN. For `[1, 2, 3, 4, 100]`,
/// `q = 0.25` gives 2.0 and `q = 0.75` gives 4.0.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Sort a copy of `values` ascending.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Median with linear interpolation.
pub fn median(values: &[f64]) -> Option<f64> {
    quantile_sorted(&sorted(values), 0.5)
}

/// Most frequent element; ties go to the value encountered first.
pub fn first_mode<T, K, F>(values: impl IntoIterator<Item = T>, key: F) -> Option<T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut counts: HashMap<K, (usize, usize)> = HashMap::new();
    let mut seen: Vec<T> = Vec::new();

    for value in values {
        let k = key(&value);
        let next_index = seen.len();
        let entry = counts.entry(k).or_insert((0, next_index));
        if entry.0 == 0 {
            seen.push(value);
        }
        entry.0 += 1;
    }

    let (_, best_index) = counts
        .into_values()
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))?;
    seen.into_iter().nth(best_index)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_numeric_dtype() {
        assert!(is_numeric_dtype(&DataType::Int64));
        assert!(is_numeric_dtype(&DataType::UInt8));
        assert!(is_numeric_dtype(&DataType::Float64));
        assert!(!is_numeric_dtype(&DataType::String));
        assert!(!is_numeric_dtype(&DataType::Boolean));
    }

    #[test]
    fn test_is_temporal_dtype() {
        assert!(is_temporal_dtype(&DataType::Date));
        assert!(is_temporal_dtype(&DataType::Datetime(
            TimeUnit::Milliseconds,
            None
        )));
        assert!(!is_temporal_dtype(&DataType::String));
    }

    #[test]
    fn test_is_missing_marker() {
        assert!(is_missing_marker(""));
        assert!(is_missing_marker("N/A"));
        assert!(is_missing_marker("  NaN "));
        assert!(is_missing_marker("#N/A"));
        assert!(!is_missing_marker("0"));
        assert!(!is_missing_marker("unknownish"));
    }

    #[test]
    fn test_quantiles_linear_interpolation() {
        let values = sorted(&[100.0, 1.0, 3.0, 2.0, 4.0]);
        assert_eq!(quantile_sorted(&values, 0.25), Some(2.0));
        assert_eq!(quantile_sorted(&values, 0.75), Some(4.0));
        assert_eq!(quantile_sorted(&[1.0, 2.0], 0.5), Some(1.5));
        assert_eq!(quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn test_mean_and_std() {
        assert_eq!(mean(&[1.0, 3.0]), Some(2.0));
        assert_eq!(mean(&[]), None);
        assert_eq!(population_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), Some(2.0));
        assert_eq!(population_std(&[5.0, 5.0]), Some(0.0));
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[1.0, 3.0]), Some(2f64.sqrt()));
        assert_eq!(sample_std(&[4.0]), None);
    }

    #[test]
    fn test_is_categorical_dtype() {
        assert!(is_categorical_dtype(&DataType::String));
        assert!(!is_categorical_dtype(&DataType::Int64));
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_first_mode_tie_goes_to_first_seen() {
        let values = vec!["b", "a", "a", "b", "c"];
        assert_eq!(first_mode(values, |v| *v), Some("b"));

        let values = vec!["x", "y", "y"];
        assert_eq!(first_mode(values, |v| *v), Some("y"));

        let empty: Vec<&str> = Vec::new();
        assert_eq!(first_mode(empty, |v| *v), None);
    }

    #[test]
    fn test_numeric_values_treats_nan_as_missing() {
        let series = Series::new("x".into(), &[Some(1.0), None, Some(f64::NAN)]);
        assert_eq!(numeric_values(&series).unwrap(), vec![Some(1.0), None, None]);
        assert_eq!(present_values(&series).unwrap(), vec![1.0]);
    }
}
