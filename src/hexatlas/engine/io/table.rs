use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::grid::{self, GridIndexer};
use crate::hexatlas::engine::io::{excel_read, excel_write};
use crate::hexatlas::engine::model::{AugmentedTable, FeatureTable, MergedTable, ReconciledTable};
use crate::hexatlas::engine::points::PointRecord;
use crate::hexatlas::engine::reconcile::BaselinePopulation;

/// Column holding the cell identifier in every cell-keyed table.
pub const CELL_COLUMN: &str = "h3";
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";
pub const POPULATION_COLUMN: &str = "population";
pub const CRIME_FLAG_COLUMN: &str = "high_crime_in_county";

/// A header row plus string cells. Empty strings stand for nulls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularData {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularData {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }

    fn require(&self, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| EngineError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    fn cell<'a>(&self, row: &'a [String], index: usize) -> &'a str {
        row.get(index).map(|cell| cell.trim()).unwrap_or_default()
    }
}

/// File format for written tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Xlsx,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Xlsx => "xlsx",
        }
    }
}

/// Reads a CSV or XLSX table, chosen by file extension.
pub fn read_table(path: &Path) -> Result<TabularData> {
    if !path.exists() {
        return Err(EngineError::MissingInput(path.to_path_buf()));
    }
    match extension(path).as_deref() {
        Some("xlsx") | Some("xlsm") => excel_read::read_table(path, None),
        _ => read_csv(path),
    }
}

pub fn read_csv(path: &Path) -> Result<TabularData> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    let mut data = TabularData::new(table_name(path), columns);
    for record in reader.records() {
        let record = record?;
        data.rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(data)
}

/// Writes the table in the requested format.
pub fn write_table(path: &Path, data: &TabularData, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(path, data),
        OutputFormat::Xlsx => excel_write::write_table(path, data),
    }
}

pub fn write_csv(path: &Path, data: &TabularData) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&data.columns)?;
    for row in &data.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn table_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("table")
        .to_string()
}

/// Cell texts read as null, as written by common dataframe exports.
const NULL_TOKENS: [&str; 8] = ["na", "n/a", "#n/a", "<na>", "nan", "-nan", "null", "none"];

/// Parses a numeric cell. Empty cells, null tokens, and non-finite values
/// (`NaN`, `inf`) are null.
fn parse_number(data: &TabularData, column: usize, raw: &str) -> Result<Option<f64>> {
    if raw.is_empty() || NULL_TOKENS.contains(&raw.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(|value| value.is_finite().then_some(value))
        .map_err(|_| EngineError::InvalidNumber {
            column: data.columns[column].clone(),
            value: raw.to_string(),
        })
}

fn skip_row(data: &TabularData, position: usize, error: &EngineError) {
    warn!(table = %data.name, row = position + 1, %error, "skipping malformed row");
}

fn format_number(value: f64) -> String {
    value.to_string()
}

fn format_optional(value: Option<f64>) -> String {
    value.map(format_number).unwrap_or_default()
}

/// Reads a point layer. Rows with an empty coordinate are skipped; rows with
/// malformed numbers are skipped and counted. Returns the points and the
/// number of malformed rows.
pub fn read_points(
    data: &TabularData,
    category_column: Option<&str>,
) -> Result<(Vec<PointRecord>, usize)> {
    let lat_index = data.require(LATITUDE_COLUMN)?;
    let lon_index = data.require(LONGITUDE_COLUMN)?;
    let category_index = category_column.map(|column| data.require(column)).transpose()?;

    let mut points = Vec::with_capacity(data.rows.len());
    let mut malformed = 0;
    for (position, row) in data.rows.iter().enumerate() {
        let coordinates = parse_number(data, lat_index, data.cell(row, lat_index)).and_then(|lat| {
            parse_number(data, lon_index, data.cell(row, lon_index)).map(|lon| (lat, lon))
        });
        let (latitude, longitude) = match coordinates {
            Ok((Some(latitude), Some(longitude))) => (latitude, longitude),
            Ok(_) => continue,
            Err(error) => {
                skip_row(data, position, &error);
                malformed += 1;
                continue;
            }
        };
        let category = category_index
            .map(|index| data.cell(row, index).to_string())
            .filter(|value| !value.is_empty());
        points.push(PointRecord {
            latitude,
            longitude,
            category,
        });
    }
    Ok((points, malformed))
}

/// Reads the baseline population layer. Rows are keyed by the cell column
/// when present, otherwise by `latitude`/`longitude`. Malformed rows and rows
/// with invalid coordinates are skipped. Returns the baseline and the number
/// of rows excluded.
pub fn read_baseline(
    data: &TabularData,
    population_column: &str,
    indexer: &GridIndexer,
) -> Result<(BaselinePopulation, usize)> {
    let population_index = data.require(population_column)?;
    let population = |row: &[String]| parse_number(data, population_index, data.cell(row, population_index));

    if let Some(cell_index) = data.column_index(CELL_COLUMN) {
        let mut values = std::collections::BTreeMap::new();
        let mut excluded = 0;
        for (position, row) in data.rows.iter().enumerate() {
            let raw_cell = data.cell(row, cell_index);
            if raw_cell.is_empty() {
                continue;
            }
            let parsed = grid::parse_cell(raw_cell)
                .and_then(|cell| population(row).map(|value| (cell, value)));
            let (cell, value) = match parsed {
                Ok(parsed) => parsed,
                Err(error) => {
                    skip_row(data, position, &error);
                    excluded += 1;
                    continue;
                }
            };
            let entry = values.entry(cell).or_insert(None);
            if let Some(value) = value {
                *entry = Some(entry.unwrap_or(0.0) + value);
            }
        }
        return Ok((BaselinePopulation::from_values(values), excluded));
    }

    let lat_index = data.require(LATITUDE_COLUMN)?;
    let lon_index = data.require(LONGITUDE_COLUMN)?;
    let mut rows = Vec::with_capacity(data.rows.len());
    let mut malformed = 0;
    for (position, row) in data.rows.iter().enumerate() {
        let parsed = parse_number(data, lat_index, data.cell(row, lat_index)).and_then(|lat| {
            let lon = parse_number(data, lon_index, data.cell(row, lon_index))?;
            Ok((lat, lon, population(row)?))
        });
        match parsed {
            Ok((Some(lat), Some(lon), value)) => rows.push((lat, lon, value)),
            Ok(_) => continue,
            Err(error) => {
                skip_row(data, position, &error);
                malformed += 1;
            }
        }
    }
    let (baseline, invalid) = BaselinePopulation::from_coordinates(rows, indexer);
    Ok((baseline, malformed + invalid))
}

/// Two-column table: cell id and the feature value.
pub fn feature_table_data(table: &FeatureTable) -> TabularData {
    let mut data = TabularData::new(
        table.name(),
        vec![CELL_COLUMN.to_string(), table.name().to_string()],
    );
    data.rows = table
        .iter()
        .map(|(cell, value)| vec![cell.to_string(), format_number(value)])
        .collect();
    data
}

pub fn merged_table_data(table: &MergedTable, name: &str) -> TabularData {
    let mut columns = vec![CELL_COLUMN.to_string()];
    columns.extend(table.columns().iter().cloned());
    let mut data = TabularData::new(name, columns);
    data.rows = table
        .rows()
        .iter()
        .map(|(cell, values)| {
            let mut row = Vec::with_capacity(values.len() + 1);
            row.push(cell.to_string());
            row.extend(values.iter().copied().map(format_optional));
            row
        })
        .collect();
    data
}

fn reconciled_columns(feature_columns: &[String]) -> Vec<String> {
    let mut columns = vec![CELL_COLUMN.to_string()];
    columns.extend(feature_columns.iter().cloned());
    columns.extend(
        [
            "total_population",
            "total_male",
            "total_female",
            "recorded_pop_diff",
            LATITUDE_COLUMN,
            LONGITUDE_COLUMN,
        ]
        .map(str::to_string),
    );
    columns
}

pub fn reconciled_table_data(table: &ReconciledTable, name: &str) -> TabularData {
    let mut data = TabularData::new(name, reconciled_columns(&table.feature_columns));
    data.rows = table
        .records
        .iter()
        .map(|record| {
            let mut row = vec![record.cell().to_string()];
            row.extend(record.features().iter().copied().map(format_optional));
            row.push(format_number(record.total_population()));
            row.push(record.total_male().to_string());
            row.push(record.total_female().to_string());
            row.push(record.recorded_pop_diff().to_string());
            row.push(format_number(record.latitude()));
            row.push(format_number(record.longitude()));
            row
        })
        .collect();
    data
}

pub fn augmented_table_data(table: &AugmentedTable, name: &str) -> TabularData {
    let mut columns = reconciled_columns(&table.feature_columns);
    columns.push("county".to_string());
    columns.push("sub_county".to_string());
    columns.extend(table.poverty_columns.iter().cloned());
    columns.push(CRIME_FLAG_COLUMN.to_string());

    let mut data = TabularData::new(name, columns);
    data.rows = table
        .records
        .iter()
        .map(|record| {
            let base = &record.base;
            let mut row = vec![base.cell().to_string()];
            row.extend(base.features().iter().copied().map(format_optional));
            row.push(format_number(base.total_population()));
            row.push(base.total_male().to_string());
            row.push(base.total_female().to_string());
            row.push(base.recorded_pop_diff().to_string());
            row.push(format_number(base.latitude()));
            row.push(format_number(base.longitude()));
            row.push(record.county.clone().unwrap_or_default());
            row.push(record.sub_county.clone().unwrap_or_default());
            row.extend(record.poverty.iter().map(|value| value.clone().unwrap_or_default()));
            row.push(u8::from(record.high_crime).to_string());
            row
        })
        .collect();
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hexatlas::engine::merge;
    use crate::hexatlas::engine::model::CellId;
    use crate::hexatlas::engine::reconcile::{self, JoinAnchor};

    fn table(name: &str, columns: &[&str], rows: &[&[&str]]) -> TabularData {
        let mut data = TabularData::new(name, columns.iter().map(|column| column.to_string()).collect());
        data.rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect();
        data
    }

    fn cell() -> CellId {
        grid::index(-1.2921, 36.8219, 8).expect("valid coordinate")
    }

    #[test]
    fn null_tokens_and_non_finite_values_read_as_null() {
        let data = table("baseline", &["population"], &[]);
        for raw in ["NaN", "nan", "inf", "-inf", "NA", "#N/A", "null", ""] {
            assert_eq!(parse_number(&data, 0, raw).expect("null"), None, "{raw}");
        }
        assert_eq!(parse_number(&data, 0, "12.5").expect("number"), Some(12.5));
        assert!(matches!(
            parse_number(&data, 0, "many"),
            Err(EngineError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn nan_baseline_is_filled_from_brackets() {
        let id = cell();
        let data = table("baseline", &[CELL_COLUMN, "population"], &[&[id.as_str(), "NaN"]]);
        let (baseline, excluded) =
            read_baseline(&data, "population", &GridIndexer::default()).expect("baseline");
        assert_eq!(excluded, 0);
        assert_eq!(baseline.get(&id), None);

        let brackets = [
            FeatureTable::from_values("population_m0", [(id.clone(), 40.0)].into_iter().collect()),
            FeatureTable::from_values("population_f0", [(id.clone(), 70.0)].into_iter().collect()),
        ];
        let merged = merge::merge_feature_tables(&brackets).expect("merged");
        let reconciliation =
            reconcile::reconcile(&merged, &baseline, JoinAnchor::Baseline).expect("reconciled");

        let record = reconciliation.table.get(&id).expect("record");
        assert_eq!(record.total_population(), 110.0);
        assert_eq!(record.recorded_pop_diff(), 0);
        assert!(record.total_population() >= (record.total_male() + record.total_female()) as f64);
        assert_eq!(reconciliation.summary.baseline_filled, 1);
    }

    #[test]
    fn malformed_baseline_rows_are_skipped_and_counted() {
        let id = cell();
        let data = table(
            "baseline",
            &[CELL_COLUMN, "population"],
            &[&[id.as_str(), "100"], &["zzzz", "5"], &[id.as_str(), "lots"]],
        );

        let (baseline, excluded) =
            read_baseline(&data, "population", &GridIndexer::default()).expect("baseline");

        assert_eq!(excluded, 2);
        assert_eq!(baseline.len(), 1);
        assert_eq!(baseline.get(&id), Some(100.0));
    }

    #[test]
    fn malformed_coordinate_baseline_rows_are_counted_with_invalid_ones() {
        let data = table(
            "baseline",
            &[LATITUDE_COLUMN, LONGITUDE_COLUMN, "population"],
            &[
                &["-1.2921", "36.8219", "10"],
                &["north", "36.8", "7"],
                &["95.0", "36.8", "3"],
            ],
        );

        let (baseline, excluded) =
            read_baseline(&data, "population", &GridIndexer::default()).expect("baseline");

        assert_eq!(excluded, 2);
        assert_eq!(baseline.get(&cell()), Some(10.0));
    }

    #[test]
    fn missing_population_column_fails_the_source() {
        let data = table("baseline", &[CELL_COLUMN], &[]);
        assert!(matches!(
            read_baseline(&data, "population", &GridIndexer::default()),
            Err(EngineError::MissingColumn { .. })
        ));
    }

    #[test]
    fn malformed_point_rows_are_skipped_and_counted() {
        let data = table(
            "schools",
            &[LATITUDE_COLUMN, LONGITUDE_COLUMN],
            &[&["-1.22", "36.82"], &["north", "36.82"], &["", ""], &["-1.23", "NaN"]],
        );

        let (points, malformed) = read_points(&data, None).expect("points");

        assert_eq!(points.len(), 1);
        assert_eq!(malformed, 1);
        assert_eq!((points[0].latitude, points[0].longitude), (-1.22, 36.82));
    }
}
