//! Joins attributed cells with per-region auxiliary data.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument, warn};

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::io::table::TabularData;
use crate::hexatlas::engine::model::{
    AttributionTable, AugmentedRecord, AugmentedTable, ReconciledTable,
};

/// Column holding the region name in the poverty source before renaming.
pub const DEFAULT_POVERTY_KEY: &str = "Subnational region";
/// Column holding the sub-county name in the crime source.
pub const DEFAULT_CRIME_KEY: &str = "sub-county";

/// Join key normalisation: trimmed and lowercased.
pub fn normalize_region_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Poverty metrics keyed by normalised region name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PovertyTable {
    columns: Vec<String>,
    rows: HashMap<String, Vec<Option<String>>>,
}

impl PovertyTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: HashMap::new(),
        }
    }

    /// Adds a region row. The first row for a region wins.
    pub fn insert(&mut self, region: &str, values: Vec<Option<String>>) -> bool {
        let key = normalize_region_name(region);
        if self.rows.contains_key(&key) {
            return false;
        }
        self.rows.insert(key, values);
        true
    }

    /// Builds the table from raw tabular data, using `key_column` as the
    /// region and discarding `drop_columns`.
    pub fn from_tabular(data: &TabularData, key_column: &str, drop_columns: &[String]) -> Result<Self> {
        let key_index = data.column_index(key_column).ok_or_else(|| EngineError::MissingColumn {
            table: data.name.clone(),
            column: key_column.to_string(),
        })?;
        let kept: Vec<usize> = (0..data.columns.len())
            .filter(|&index| index != key_index && !drop_columns.contains(&data.columns[index]))
            .collect();
        let mut table = Self::new(kept.iter().map(|&index| data.columns[index].clone()).collect());

        for row in &data.rows {
            let region = row.get(key_index).map(String::as_str).unwrap_or_default();
            if region.trim().is_empty() {
                continue;
            }
            let values = kept
                .iter()
                .map(|&index| {
                    row.get(index)
                        .map(|cell| cell.trim())
                        .filter(|cell| !cell.is_empty())
                        .map(str::to_string)
                })
                .collect();
            if !table.insert(region, values) {
                warn!(region, "duplicate poverty row ignored");
            }
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn lookup(&self, region: &str) -> Option<&[Option<String>]> {
        self.rows
            .get(&normalize_region_name(region))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Sub-counties listed as high-crime areas.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CrimeSubregions {
    names: HashSet<String>,
}

impl CrimeSubregions {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| normalize_region_name(name.as_ref()))
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    pub fn from_tabular(data: &TabularData, key_column: &str) -> Result<Self> {
        let key_index = data.column_index(key_column).ok_or_else(|| EngineError::MissingColumn {
            table: data.name.clone(),
            column: key_column.to_string(),
        })?;
        Ok(Self::from_names(
            data.rows.iter().filter_map(|row| row.get(key_index)),
        ))
    }

    /// Exact membership after normalisation.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_region_name(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Region-level inputs for the augmentor. Missing pieces produce null
/// columns (or a `false` crime flag) rather than errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionData<'a> {
    pub county: Option<&'a AttributionTable>,
    pub sub_county: Option<&'a AttributionTable>,
    pub poverty: Option<&'a PovertyTable>,
    pub crime: Option<&'a CrimeSubregions>,
}

/// Builds the final table: one row per reconciled cell.
#[instrument(level = "info", skip_all, fields(records = table.len()))]
pub fn augment(table: &ReconciledTable, regions: RegionData<'_>) -> AugmentedTable {
    let poverty_columns = regions
        .poverty
        .map(|poverty| poverty.columns().to_vec())
        .unwrap_or_default();
    let mut unmatched_poverty = 0;
    let mut high_crime = 0;

    let records: Vec<AugmentedRecord> = table
        .records
        .iter()
        .map(|record| {
            let county = regions
                .county
                .and_then(|level| level.region(record.cell()))
                .map(str::to_string);
            let sub_county = regions
                .sub_county
                .and_then(|level| level.region(record.cell()))
                .map(str::to_string);

            let poverty = match (regions.poverty, county.as_deref()) {
                (Some(poverty), Some(name)) => match poverty.lookup(name) {
                    Some(values) => values.to_vec(),
                    None => {
                        unmatched_poverty += 1;
                        vec![None; poverty_columns.len()]
                    }
                },
                _ => vec![None; poverty_columns.len()],
            };

            let flagged = match (regions.crime, sub_county.as_deref()) {
                (Some(crime), Some(name)) => crime.contains(name),
                _ => false,
            };
            if flagged {
                high_crime += 1;
            }

            AugmentedRecord {
                base: record.clone(),
                county,
                sub_county,
                poverty,
                high_crime: flagged,
            }
        })
        .collect();

    if unmatched_poverty > 0 {
        debug!(unmatched_poverty, "cells whose county has no poverty row");
    }
    info!(records = records.len(), high_crime, "table augmented");

    AugmentedTable {
        feature_columns: table.feature_columns.clone(),
        poverty_columns,
        records,
    }
}
