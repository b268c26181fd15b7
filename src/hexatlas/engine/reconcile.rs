//! Population reconciliation.
//!
//! Combines the merged age/sex brackets with an independently collected
//! baseline population layer. The recorded difference between the two is kept
//! as an audit value; the corrected `total_population` never falls below the
//! bracket sum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::hexatlas::engine::error::Result;
use crate::hexatlas::engine::grid::{self, GridIndexer};
use crate::hexatlas::engine::model::{
    CellId, FeatureLabel, MergedTable, ReconciledRecord, ReconciledTable, Sex,
};
use crate::hexatlas::engine::report::ReconciliationSummary;

/// Which table's cells define the rows of the reconciled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinAnchor {
    /// One row per baseline cell.
    #[default]
    Baseline,
    /// One row per demographic cell; baseline gaps are filled from brackets.
    Demographics,
}

/// Baseline population per cell. A `None` value is a recorded cell without a
/// population figure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaselinePopulation {
    values: BTreeMap<CellId, Option<f64>>,
}

impl BaselinePopulation {
    pub fn from_values(values: BTreeMap<CellId, Option<f64>>) -> Self {
        Self { values }
    }

    /// Builds the baseline from coordinate-keyed rows, summing rows that land
    /// in the same cell. Returns the baseline and the number of rows excluded
    /// for invalid coordinates.
    pub fn from_coordinates(
        rows: impl IntoIterator<Item = (f64, f64, Option<f64>)>,
        indexer: &GridIndexer,
    ) -> (Self, usize) {
        let mut values: BTreeMap<CellId, Option<f64>> = BTreeMap::new();
        let mut invalid = 0;
        for (lat, lon, population) in rows {
            let Ok(cell) = indexer.index(lat, lon) else {
                invalid += 1;
                continue;
            };
            let entry = values.entry(cell).or_insert(None);
            if let Some(population) = population {
                *entry = Some(entry.unwrap_or(0.0) + population);
            }
        }
        (Self { values }, invalid)
    }

    /// Population for the cell; non-finite values count as missing.
    pub fn get(&self, cell: &CellId) -> Option<f64> {
        self.values
            .get(cell)
            .copied()
            .flatten()
            .filter(|value| value.is_finite())
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &CellId> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Reconciled table plus the counts gathered along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub table: ReconciledTable,
    pub summary: ReconciliationSummary,
}

struct BracketColumns {
    all: Vec<usize>,
    male: Vec<usize>,
    female: Vec<usize>,
}

impl BracketColumns {
    fn classify(columns: &[String]) -> Self {
        let mut brackets = Self {
            all: Vec::new(),
            male: Vec::new(),
            female: Vec::new(),
        };
        for (index, column) in columns.iter().enumerate() {
            if let Some(label) = FeatureLabel::from_column(column) {
                brackets.all.push(index);
                match label.sex {
                    Sex::Male => brackets.male.push(index),
                    Sex::Female => brackets.female.push(index),
                }
            }
        }
        brackets
    }
}

fn sum_of(row: &[Option<f64>], indices: &[usize]) -> f64 {
    indices.iter().filter_map(|&index| row[index]).sum()
}

/// Rounds to the nearest integer, ties to even.
fn round_count(value: f64) -> i64 {
    value.round_ties_even() as i64
}

/// Joins the demographic brackets with the baseline population and derives
/// `total_population`, `total_male`, `total_female` and `recorded_pop_diff`.
#[instrument(level = "info", skip_all, fields(cells = demographics.len(), baseline = baseline.len(), ?anchor))]
pub fn reconcile(
    demographics: &MergedTable,
    baseline: &BaselinePopulation,
    anchor: JoinAnchor,
) -> Result<Reconciliation> {
    let brackets = BracketColumns::classify(demographics.columns());
    let width = demographics.columns().len();
    let cells: Vec<&CellId> = match anchor {
        JoinAnchor::Demographics => demographics.cell_ids().collect(),
        JoinAnchor::Baseline => baseline.cell_ids().collect(),
    };

    let mut summary = ReconciliationSummary::default();
    let mut records = Vec::with_capacity(cells.len());

    for cell in cells {
        let features = demographics
            .row(cell)
            .map(<[Option<f64>]>::to_vec)
            .unwrap_or_else(|| vec![None; width]);

        let population = match baseline.get(cell) {
            Some(value) => value,
            None => {
                summary.baseline_filled += 1;
                sum_of(&features, &brackets.all)
            }
        };
        let total_male = round_count(sum_of(&features, &brackets.male));
        let total_female = round_count(sum_of(&features, &brackets.female));
        let bracket_total = total_male + total_female;

        let recorded_pop_diff = round_count(population) - bracket_total;
        if recorded_pop_diff == 0 {
            summary.matching_before_correction += 1;
        }

        let total_population = if bracket_total as f64 > population {
            summary.corrected += 1;
            bracket_total as f64
        } else {
            population
        };
        if round_count(total_population) == bracket_total {
            summary.matching_after_correction += 1;
        }

        let (latitude, longitude) = grid::centroid(cell)?;
        records.push(ReconciledRecord::new(
            cell.clone(),
            features,
            total_population,
            total_male,
            total_female,
            recorded_pop_diff,
            latitude,
            longitude,
        ));
    }

    summary.records = records.len();
    info!(
        records = summary.records,
        filled = summary.baseline_filled,
        matching_before = summary.matching_before_correction,
        matching_after = summary.matching_after_correction,
        corrected = summary.corrected,
        "population reconciled"
    );

    Ok(Reconciliation {
        table: ReconciledTable {
            feature_columns: demographics.columns().to_vec(),
            records,
        },
        summary,
    })
}
