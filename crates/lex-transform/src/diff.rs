//! Identity-keyed comparison of two dataset versions.
//!
//! Rows are matched by the row identity column, never by position. Rows
//! that disappeared are reported as deleted; rows present on both sides
//! are compared cell by cell over the data columns both sides share.
//! Columns present on only one side are structural changes and are not
//! row-diffed.
//!
//! The cell comparison dominates the cost. Above a configurable row count
//! the common identities are split into contiguous chunks compared on the
//! rayon pool; chunk results are merged in chunk order, so the output
//! never depends on scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::config::{DEFAULT_DIFF_MIN_CHUNK_ROWS, DEFAULT_DIFF_PARALLEL_THRESHOLD, EngineConfig};
use crate::dataset::Dataset;
use crate::dataset::value::{CellValue, normalize_series};
use crate::error::Result;

/// Full diff between two dataset versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    /// Identities only in the original, ascending
    pub deleted: Vec<u64>,
    /// Changed columns per common identity; rows without changes are absent
    pub updated: BTreeMap<u64, BTreeSet<String>>,
}

/// Size-bounded rendering of a [`DiffResult`] for client payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffMarks {
    pub deleted_row_indices: Vec<u64>,
    pub updated_cells: BTreeMap<u64, BTreeMap<String, bool>>,
    /// Whether either list was cut
    pub truncated: bool,
    pub total_deleted: usize,
    pub total_updated_rows: usize,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.updated.is_empty()
    }

    /// Number of changed cells across all rows.
    pub fn updated_cell_count(&self) -> usize {
        self.updated.values().map(BTreeSet::len).sum()
    }

    /// Cap the deleted list and the updated rows, keeping the lowest
    /// identities of each.
    pub fn marks(&self, max_deleted: usize, max_updated_rows: usize) -> DiffMarks {
        let truncated = self.deleted.len() > max_deleted || self.updated.len() > max_updated_rows;
        DiffMarks {
            deleted_row_indices: self.deleted.iter().take(max_deleted).copied().collect(),
            updated_cells: self
                .updated
                .iter()
                .take(max_updated_rows)
                .map(|(id, cols)| (*id, cols.iter().map(|c| (c.clone(), true)).collect()))
                .collect(),
            truncated,
            total_deleted: self.deleted.len(),
            total_updated_rows: self.updated.len(),
        }
    }
}

/// Computes [`DiffResult`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffEngine {
    /// Common-row count at which comparison goes parallel
    pub parallel_threshold: usize,
    /// Smallest chunk handed to one worker
    pub min_chunk_rows: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_DIFF_PARALLEL_THRESHOLD,
            min_chunk_rows: DEFAULT_DIFF_MIN_CHUNK_ROWS,
        }
    }
}

impl From<&EngineConfig> for DiffEngine {
    fn from(config: &EngineConfig) -> Self {
        Self {
            parallel_threshold: config.diff_parallel_threshold,
            min_chunk_rows: config.diff_min_chunk_rows.max(1),
        }
    }
}

/// Normalized cells of the comparison columns, plus identity → row position.
struct Side {
    columns: Vec<Vec<CellValue>>,
    positions: HashMap<u64, usize>,
}

impl Side {
    fn load(dataset: &Dataset, columns: &[String]) -> Result<Self> {
        let columns = columns
            .par_iter()
            .map(|c| Ok(normalize_series(dataset.series(c)?)?))
            .collect::<Result<Vec<_>>>()?;
        let positions = dataset
            .row_ids()?
            .into_iter()
            .enumerate()
            .map(|(pos, id)| (id, pos))
            .collect();
        Ok(Self { columns, positions })
    }
}

impl DiffEngine {
    pub fn new(parallel_threshold: usize, min_chunk_rows: usize) -> Self {
        Self {
            parallel_threshold,
            min_chunk_rows: min_chunk_rows.max(1),
        }
    }

    /// Diff `original` against `transformed`.
    pub fn compute(&self, original: &Dataset, transformed: &Dataset) -> Result<DiffResult> {
        let after: BTreeSet<String> = transformed.data_columns().into_iter().collect();
        let columns: Vec<String> = original
            .data_columns()
            .into_iter()
            .filter(|c| after.contains(c))
            .collect();

        let before = Side::load(original, &columns)?;
        let after = Side::load(transformed, &columns)?;

        let mut original_ids: Vec<u64> = before.positions.keys().copied().collect();
        original_ids.sort_unstable();
        let (common, deleted): (Vec<u64>, Vec<u64>) = original_ids
            .into_iter()
            .partition(|id| after.positions.contains_key(id));

        let compare_chunk = |ids: &[u64]| -> Vec<(u64, BTreeSet<String>)> {
            ids.iter()
                .filter_map(|id| {
                    let (a, b) = (before.positions[id], after.positions[id]);
                    let changed: BTreeSet<String> = columns
                        .iter()
                        .enumerate()
                        .filter(|(c, _)| before.columns[*c][a] != after.columns[*c][b])
                        .map(|(_, name)| name.clone())
                        .collect();
                    (!changed.is_empty()).then_some((*id, changed))
                })
                .collect()
        };

        let updated: BTreeMap<u64, BTreeSet<String>> = if common.len() < self.parallel_threshold {
            compare_chunk(&common).into_iter().collect()
        } else {
            let workers = rayon::current_num_threads()
                .min(common.len().div_ceil(self.min_chunk_rows))
                .max(1);
            let chunk_size = common.len().div_ceil(workers).max(1);
            debug!(
                "Diffing {} common rows across {} chunks of {}",
                common.len(),
                workers,
                chunk_size
            );
            common
                .par_chunks(chunk_size)
                .map(compare_chunk)
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        };

        Ok(DiffResult { deleted, updated })
    }
}
