//! Row and column pruning steps: duplicates, nulls and dropped columns.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::debug;

use super::{ChangeMetadata, Step, StepContext, filter_rows, require_columns};
use crate::dataset::value::{CellKey, normalize_series};
use crate::dataset::{Dataset, ROW_ID_COLUMN};
use crate::error::Result;

fn columns_fact(requested: &Option<Vec<String>>) -> Value {
    match requested {
        Some(cols) if !cols.is_empty() => json!(cols),
        _ => json!("all"),
    }
}

/// Resolve an optional column list, defaulting to every data column.
fn target_columns(dataset: &Dataset, requested: &Option<Vec<String>>) -> Result<Vec<String>> {
    match requested {
        Some(cols) if !cols.is_empty() => {
            require_columns(dataset, cols)?;
            Ok(cols.clone())
        }
        _ => Ok(dataset.data_columns()),
    }
}

// =============================================================================
// Remove Duplicates
// =============================================================================

/// Drop rows that repeat an earlier row on `subset` (or on every data
/// column). The first occurrence is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveDuplicates {
    #[serde(default)]
    pub subset: Option<Vec<String>>,
}

impl Step for RemoveDuplicates {
    fn name(&self) -> &'static str {
        "Remove Duplicates"
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let columns = target_columns(dataset, &self.subset)?;

        let normalized = columns
            .iter()
            .map(|c| normalize_series(dataset.series(c)?).map_err(Into::into))
            .collect::<Result<Vec<_>>>()?;

        let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(dataset.height());
        let keep: Vec<bool> = (0..dataset.height())
            .map(|row| seen.insert(normalized.iter().map(|col| col[row].key()).collect()))
            .collect();

        let output = filter_rows(dataset, &keep)?;
        let removed = dataset.height() - output.height();
        debug!("Removed {} duplicate rows", removed);

        let meta = ChangeMetadata::new(self.name())
            .with("rows_removed", json!(removed))
            .with("columns", columns_fact(&self.subset));
        Ok((output, meta))
    }
}

// =============================================================================
// Remove Nulls
// =============================================================================

/// Drop rows with a missing value in any of `columns` (or any data column).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoveNulls {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Step for RemoveNulls {
    fn name(&self) -> &'static str {
        "Remove Nulls"
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let columns = target_columns(dataset, &self.columns)?;

        let mut keep = vec![true; dataset.height()];
        for column in &columns {
            let cells = normalize_series(dataset.series(column)?)?;
            for (flag, cell) in keep.iter_mut().zip(&cells) {
                *flag &= !cell.is_missing();
            }
        }

        let output = filter_rows(dataset, &keep)?;
        let removed = dataset.height() - output.height();
        debug!("Removed {} rows with missing values", removed);

        let meta = ChangeMetadata::new(self.name())
            .with("rows_removed", json!(removed))
            .with("columns", columns_fact(&self.columns));
        Ok((output, meta))
    }
}

// =============================================================================
// Drop Columns
// =============================================================================

/// Remove the named columns. Unknown names are ignored and the identity
/// column is never dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropColumns {
    #[serde(default)]
    pub columns: Vec<String>,
}

impl Step for DropColumns {
    fn name(&self) -> &'static str {
        "Drop Columns"
    }

    fn apply(&self, dataset: &Dataset, _ctx: &StepContext) -> Result<(Dataset, ChangeMetadata)> {
        let mut frame = dataset.frame().clone();
        let mut dropped = Vec::new();

        for name in &self.columns {
            if name == ROW_ID_COLUMN {
                debug!("Refusing to drop identity column '{}'", ROW_ID_COLUMN);
                continue;
            }
            if dropped.contains(name) || !dataset.has_column(name) {
                continue;
            }
            frame = frame.drop(name)?;
            dropped.push(name.clone());
        }

        let meta = ChangeMetadata::new(self.name()).with("columns_dropped", json!(dropped));
        Ok((Dataset::derived(frame), meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::fixtures::dataset;
    use polars::prelude::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> StepContext {
        StepContext::default()
    }

    // =========================================================================
    // Remove Duplicates
    // =========================================================================

    #[test]
    fn test_remove_duplicates_on_subset_keeps_first() {
        let ds = Dataset::from_frame(
            df! {
                ROW_ID_COLUMN => &[1u64, 2, 3],
                "a" => &[1i64, 1, 2],
            }
            .unwrap(),
        )
        .unwrap();

        let step = RemoveDuplicates {
            subset: Some(vec!["a".to_string()]),
        };
        let (out, meta) = step.apply(&ds, &ctx()).unwrap();

        assert_eq!(out.row_ids().unwrap(), vec![1, 3]);
        assert_eq!(meta.rows_removed(), Some(1));
        assert_eq!(meta.fact("columns"), Some(&json!(["a"])));
    }

    #[test]
    fn test_remove_duplicates_ignores_identity_by_default() {
        let ds = dataset(df! {
            "a" => &[Some(1i64), Some(1), None, None],
            "b" => &["x", "x", "y", "y"],
        });

        let (out, meta) = RemoveDuplicates::default().apply(&ds, &ctx()).unwrap();

        assert_eq!(out.row_ids().unwrap(), vec![0, 2]);
        assert_eq!(meta.rows_removed(), Some(2));
        assert_eq!(meta.fact("columns"), Some(&json!("all")));
    }

    #[test]
    fn test_remove_duplicates_unknown_subset_column() {
        let ds = dataset(df! { "a" => &[1i64] });
        let step = RemoveDuplicates {
            subset: Some(vec!["nope".to_string()]),
        };
        assert_eq!(
            step.apply(&ds, &ctx()).unwrap_err().error_code(),
            "COLUMN_NOT_FOUND"
        );
    }

    #[test]
    fn test_remove_duplicates_no_op_still_reports() {
        let ds = dataset(df! { "a" => &[1i64, 2, 3] });
        let (out, meta) = RemoveDuplicates::default().apply(&ds, &ctx()).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(meta.rows_removed(), Some(0));
    }

    // =========================================================================
    // Remove Nulls
    // =========================================================================

    #[test]
    fn test_remove_nulls_all_columns() {
        let ds = dataset(df! {
            "a" => &[Some(1.0f64), Some(f64::NAN), Some(3.0), Some(4.0)],
            "b" => &[Some("x"), Some("y"), None, Some("w")],
        });

        let (out, meta) = RemoveNulls::default().apply(&ds, &ctx()).unwrap();

        assert_eq!(out.row_ids().unwrap(), vec![0, 3]);
        assert_eq!(meta.rows_removed(), Some(2));
    }

    #[test]
    fn test_remove_nulls_listed_columns_only() {
        let ds = dataset(df! {
            "a" => &[Some(1i64), None, Some(3)],
            "b" => &[None, Some("y"), Some("z")],
        });

        let step = RemoveNulls {
            columns: Some(vec!["a".to_string()]),
        };
        let (out, meta) = step.apply(&ds, &ctx()).unwrap();

        assert_eq!(out.row_ids().unwrap(), vec![0, 2]);
        assert_eq!(meta.fact("columns"), Some(&json!(["a"])));
    }

    // =========================================================================
    // Drop Columns
    // =========================================================================

    #[test]
    fn test_drop_columns_ignores_unknown_and_protects_identity() {
        let ds = dataset(df! {
            "a" => &[1i64],
            "b" => &[2i64],
        });

        let step = DropColumns {
            columns: vec![
                "a".to_string(),
                "ghost".to_string(),
                ROW_ID_COLUMN.to_string(),
                "a".to_string(),
            ],
        };
        let (out, meta) = step.apply(&ds, &ctx()).unwrap();

        assert_eq!(out.data_columns(), vec!["b".to_string()]);
        assert!(out.has_column(ROW_ID_COLUMN));
        assert_eq!(meta.fact("columns_dropped"), Some(&json!(["a"])));
    }
}
