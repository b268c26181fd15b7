use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::hexatlas::engine::geometry::MultiPolygon;
use crate::hexatlas::engine::model::CellId;

/// Wide table produced by the merger: one row per cell, one nullable value
/// per feature column. Column order follows the order the inputs were merged.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedTable {
    columns: Vec<String>,
    rows: BTreeMap<CellId, Vec<Option<f64>>>,
}

impl MergedTable {
    pub(crate) fn from_parts(columns: Vec<String>, rows: BTreeMap<CellId, Vec<Option<f64>>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &BTreeMap<CellId, Vec<Option<f64>>> {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &CellId> {
        self.rows.keys()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    pub fn row(&self, cell: &CellId) -> Option<&[Option<f64>]> {
        self.rows.get(cell).map(Vec::as_slice)
    }

    /// Value of one column for one cell. `None` covers both a missing cell
    /// and a null entry.
    pub fn value(&self, cell: &CellId, column: &str) -> Option<f64> {
        let index = self.column_index(column)?;
        self.rows.get(cell).and_then(|row| row[index])
    }
}

/// A merged demographic row after population reconciliation.
///
/// The totals are only readable: `recorded_pop_diff` is fixed when the
/// record is built and `total_population` already reflects the correction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRecord {
    cell: CellId,
    features: Vec<Option<f64>>,
    total_population: f64,
    total_male: i64,
    total_female: i64,
    recorded_pop_diff: i64,
    latitude: f64,
    longitude: f64,
}

impl ReconciledRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cell: CellId,
        features: Vec<Option<f64>>,
        total_population: f64,
        total_male: i64,
        total_female: i64,
        recorded_pop_diff: i64,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            cell,
            features,
            total_population,
            total_male,
            total_female,
            recorded_pop_diff,
            latitude,
            longitude,
        }
    }

    pub fn cell(&self) -> &CellId {
        &self.cell
    }

    /// Feature values aligned with [`ReconciledTable::feature_columns`].
    pub fn features(&self) -> &[Option<f64>] {
        &self.features
    }

    pub fn total_population(&self) -> f64 {
        self.total_population
    }

    pub fn total_male(&self) -> i64 {
        self.total_male
    }

    pub fn total_female(&self) -> i64 {
        self.total_female
    }

    /// Recorded population minus the bracket sum, taken before correction.
    pub fn recorded_pop_diff(&self) -> i64 {
        self.recorded_pop_diff
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Output of the population reconciler.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReconciledTable {
    pub feature_columns: Vec<String>,
    pub records: Vec<ReconciledRecord>,
}

impl ReconciledTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, cell: &CellId) -> Option<&ReconciledRecord> {
        self.records.iter().find(|record| &record.cell == cell)
    }
}

/// A named administrative region at one level.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminPolygon {
    pub name: String,
    pub level: String,
    pub geometry: MultiPolygon,
}

impl AdminPolygon {
    pub fn new(name: impl Into<String>, level: impl Into<String>, geometry: MultiPolygon) -> Self {
        Self {
            name: name.into(),
            level: level.into(),
            geometry,
        }
    }
}

/// Which stage of the cascade produced an attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStage {
    Within,
    Intersects,
    Nearest,
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStage::Within => write!(f, "within"),
            MatchStage::Intersects => write!(f, "intersects"),
            MatchStage::Nearest => write!(f, "nearest"),
        }
    }
}

/// Region assigned to a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub region: String,
    pub stage: MatchStage,
}

/// Number of cells resolved by each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StageCounts {
    pub within: usize,
    pub intersects: usize,
    pub nearest: usize,
}

impl StageCounts {
    pub fn record(&mut self, stage: MatchStage) {
        match stage {
            MatchStage::Within => self.within += 1,
            MatchStage::Intersects => self.intersects += 1,
            MatchStage::Nearest => self.nearest += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.within + self.intersects + self.nearest
    }
}

/// Attribution of every cell at one administrative level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributionTable {
    pub level: String,
    pub assignments: BTreeMap<CellId, Attribution>,
    pub counts: StageCounts,
}

impl AttributionTable {
    pub fn get(&self, cell: &CellId) -> Option<&Attribution> {
        self.assignments.get(cell)
    }

    pub fn region(&self, cell: &CellId) -> Option<&str> {
        self.assignments.get(cell).map(|entry| entry.region.as_str())
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Terminal record: reconciled values plus regions and auxiliary metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedRecord {
    pub base: ReconciledRecord,
    pub county: Option<String>,
    pub sub_county: Option<String>,
    /// Poverty metric values aligned with [`AugmentedTable::poverty_columns`].
    pub poverty: Vec<Option<String>>,
    pub high_crime: bool,
}

/// Final table written by the pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AugmentedTable {
    pub feature_columns: Vec<String>,
    pub poverty_columns: Vec<String>,
    pub records: Vec<AugmentedRecord>,
}
