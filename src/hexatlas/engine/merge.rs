//! Keyed joins over cell-indexed tables.
//!
//! The key set of an outer merge is the union of the inputs' key sets no
//! matter the order; column order follows input order, so callers wanting
//! reproducible column layouts should apply [`canonical_order`] first.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::model::{CellId, FeatureTable, MergedTable};

/// Join kinds supported between two keyed tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Keep only the left table's keys.
    Left,
    /// Keep the union of both tables' keys.
    Outer,
}

impl From<&FeatureTable> for MergedTable {
    fn from(table: &FeatureTable) -> Self {
        let rows = table
            .iter()
            .map(|(cell, value)| (cell.clone(), vec![Some(value)]))
            .collect();
        MergedTable::from_parts(vec![table.name().to_string()], rows)
    }
}

/// Joins `right` onto `left` by cell id. Absent values become `None`.
pub fn join(left: &MergedTable, right: &MergedTable, kind: JoinKind) -> Result<MergedTable> {
    if let Some(duplicate) = right
        .columns()
        .iter()
        .find(|column| left.column_index(column).is_some())
    {
        return Err(EngineError::DuplicateColumn(duplicate.clone()));
    }

    let left_width = left.columns().len();
    let right_width = right.columns().len();

    let keys: BTreeSet<&CellId> = match kind {
        JoinKind::Left => left.cell_ids().collect(),
        JoinKind::Outer => left.cell_ids().chain(right.cell_ids()).collect(),
    };

    let rows: BTreeMap<CellId, Vec<Option<f64>>> = keys
        .into_iter()
        .map(|cell| {
            let mut row = Vec::with_capacity(left_width + right_width);
            match left.row(cell) {
                Some(values) => row.extend_from_slice(values),
                None => row.resize(left_width, None),
            }
            match right.row(cell) {
                Some(values) => row.extend_from_slice(values),
                None => row.resize(left_width + right_width, None),
            }
            (cell.clone(), row)
        })
        .collect();

    let mut columns = left.columns().to_vec();
    columns.extend(right.columns().iter().cloned());
    Ok(MergedTable::from_parts(columns, rows))
}

/// Full outer join of two wide tables.
pub fn outer_join(left: &MergedTable, right: &MergedTable) -> Result<MergedTable> {
    join(left, right, JoinKind::Outer)
}

/// Left join keeping `anchor`'s keys.
pub fn left_join(anchor: &MergedTable, other: &MergedTable) -> Result<MergedTable> {
    join(anchor, other, JoinKind::Left)
}

/// Merges feature tables with repeated pairwise outer joins, left to right.
pub fn merge_feature_tables(tables: &[FeatureTable]) -> Result<MergedTable> {
    let merged = tables
        .iter()
        .try_fold(MergedTable::default(), |acc, table| {
            outer_join(&acc, &MergedTable::from(table))
        })?;
    debug!(
        inputs = tables.len(),
        cells = merged.len(),
        columns = merged.columns().len(),
        "merged feature tables"
    );
    Ok(merged)
}

/// Sorts tables by feature name so merged column order is reproducible.
pub fn canonical_order(tables: &mut [FeatureTable]) {
    tables.sort_by(|lhs, rhs| lhs.name().cmp(rhs.name()));
}
