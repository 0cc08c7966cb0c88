//! The dataset value type and the row identity convention.
//!
//! Every [`Dataset`] carries exactly one identity column, [`ROW_ID_COLUMN`],
//! holding a unique non-negative integer per row. The identity is assigned
//! once, when a frame first enters the engine, and every step copies it
//! through untouched. The diff engine relies on it to correlate rows across
//! deletions.
//!
//! A `Dataset` is a value type. Steps take a reference and build a new one;
//! polars columns are reference-counted, so the clone a step starts from is
//! cheap and copy-on-write.

pub mod codec;
pub mod value;

use polars::prelude::*;
use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::utils::is_integer_dtype;

pub use codec::DatasetFormat;
pub use value::CellValue;

/// Name of the column that holds the row identity.
pub const ROW_ID_COLUMN: &str = "_row_id";

/// A tabular dataset with a stable row identity column.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
}

impl Dataset {
    /// Wrap a frame, assigning row identities `0..n` if the frame has none.
    ///
    /// If [`ROW_ID_COLUMN`] is already present it must be integer-typed,
    /// free of nulls and negative values, and unique; it is normalized to
    /// `UInt64`.
    pub fn from_frame(frame: DataFrame) -> Result<Self> {
        if frame.get_column_names().iter().any(|n| n.as_str() == ROW_ID_COLUMN) {
            return Self::with_existing_identity(frame);
        }

        let ids: Vec<u64> = (0..frame.height() as u64).collect();
        let mut columns = Vec::with_capacity(frame.width() + 1);
        columns.push(Series::new(ROW_ID_COLUMN.into(), ids).into_column());
        columns.extend(frame.get_columns().iter().cloned());

        Ok(Self {
            frame: DataFrame::new(columns)?,
        })
    }

    fn with_existing_identity(mut frame: DataFrame) -> Result<Self> {
        let ids = frame.column(ROW_ID_COLUMN)?.as_materialized_series().clone();

        if !is_integer_dtype(ids.dtype()) {
            return Err(EngineError::InvalidDataset(format!(
                "'{}' must be integer-typed, found {}",
                ROW_ID_COLUMN,
                ids.dtype()
            )));
        }
        if ids.null_count() > 0 {
            return Err(EngineError::InvalidDataset(format!(
                "'{}' contains missing values",
                ROW_ID_COLUMN
            )));
        }

        // Negative ids become null under a non-strict cast.
        let ids = ids.cast(&DataType::UInt64)?;
        if ids.null_count() > 0 {
            return Err(EngineError::InvalidDataset(format!(
                "'{}' contains negative values",
                ROW_ID_COLUMN
            )));
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids.u64()?.into_iter().flatten() {
            if !seen.insert(id) {
                return Err(EngineError::InvalidDataset(format!(
                    "'{}' contains duplicate id {}",
                    ROW_ID_COLUMN, id
                )));
            }
        }

        frame.with_column(ids)?;
        Ok(Self { frame })
    }

    /// Wrap a frame produced by a step from an existing dataset.
    ///
    /// Only the cheap part of the identity invariant is checked here; the
    /// step engine calls [`Dataset::check_identity`] after every step.
    pub(crate) fn derived(frame: DataFrame) -> Self {
        Self { frame }
    }

    /// Verify the identity column is present, `UInt64` and null-free.
    pub fn check_identity(&self) -> Result<()> {
        let column = self.frame.column(ROW_ID_COLUMN).map_err(|_| {
            EngineError::InvalidDataset(format!("'{}' column was removed", ROW_ID_COLUMN))
        })?;

        if column.dtype() != &DataType::UInt64 {
            return Err(EngineError::InvalidDataset(format!(
                "'{}' changed type to {}",
                ROW_ID_COLUMN,
                column.dtype()
            )));
        }
        if column.null_count() > 0 {
            return Err(EngineError::InvalidDataset(format!(
                "'{}' contains missing values",
                ROW_ID_COLUMN
            )));
        }
        Ok(())
    }

    /// The underlying frame, identity column included.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Row identities in row order.
    pub fn row_ids(&self) -> Result<Vec<u64>> {
        let ids = self.frame.column(ROW_ID_COLUMN)?.as_materialized_series();
        Ok(ids.u64()?.into_iter().flatten().collect())
    }

    /// Names of all columns except the identity column, in frame order.
    pub fn data_columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .filter(|n| n.as_str() != ROW_ID_COLUMN)
            .map(|n| n.to_string())
            .collect()
    }

    /// Check whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    /// Look up a column as a series.
    pub fn series(&self, name: &str) -> Result<&Series> {
        self.frame
            .column(name)
            .map(|c| c.as_materialized_series())
            .map_err(|_| EngineError::ColumnNotFound(name.to_string()))
    }

    /// The frame without the identity column.
    pub fn without_identity(&self) -> Result<DataFrame> {
        Ok(self.frame.drop(ROW_ID_COLUMN)?)
    }

    /// The first `limit` rows, or every row when `limit` is `None`.
    pub fn head(&self, limit: Option<usize>) -> Dataset {
        match limit {
            Some(n) => Self::derived(self.frame.head(Some(n))),
            None => self.clone(),
        }
    }
}
