//! Raster → hexagon aggregation.
//!
//! Every valid pixel is mapped through the raster's affine transform, indexed
//! into a cell, and summed into that cell's bucket. Sums form a commutative
//! monoid ([`CellSums`]) so fixed row chunks are summed in parallel, then
//! combined in chunk order, and sources can be processed in any order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::grid::GridIndexer;
use crate::hexatlas::engine::io::raster_read;
use crate::hexatlas::engine::model::{CellId, FeatureTable, feature_column};
use crate::hexatlas::engine::report::{SourceKind, SourceOutcome, SourceStatus};

/// Affine pixel → coordinate mapping, in GDAL coefficient order:
/// `x = origin_x + col * pixel_width + row * row_rotation` and
/// `y = origin_y + col * column_rotation + row * pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Transform for an unrotated raster whose top-left corner is at
    /// `(origin_x, origin_y)`. `pixel_height` is negative for north-up data.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            column_rotation: 0.0,
            pixel_height,
        }
    }

    /// Maps a (possibly fractional) pixel position to `(x, y)` = `(lon, lat)`.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.origin_x + col * self.pixel_width + row * self.row_rotation;
        let y = self.origin_y + col * self.column_rotation + row * self.pixel_height;
        (x, y)
    }
}

/// Which point of a pixel is fed through the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelAnchor {
    /// `(col, row)` as is: the pixel's top-left corner.
    #[default]
    Corner,
    /// `(col + 0.5, row + 0.5)`: the pixel centre.
    Center,
}

impl PixelAnchor {
    fn offset(self) -> f64 {
        match self {
            PixelAnchor::Corner => 0.0,
            PixelAnchor::Center => 0.5,
        }
    }
}

/// A single-band raster held in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    width: usize,
    height: usize,
    values: Vec<f64>,
    transform: GeoTransform,
    nodata: Option<f64>,
}

impl RasterGrid {
    pub fn new(
        width: usize,
        height: usize,
        values: Vec<f64>,
        transform: GeoTransform,
        nodata: Option<f64>,
    ) -> Result<Self> {
        if values.len() != width * height {
            return Err(EngineError::InvalidRaster(format!(
                "expected {} values for a {width}x{height} grid, found {}",
                width * height,
                values.len()
            )));
        }
        Ok(Self {
            width,
            height,
            values,
            transform,
            nodata,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.width..(row + 1) * self.width]
    }

    fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nodata| value == nodata)
    }
}

/// Per-cell running sums.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellSums {
    sums: BTreeMap<CellId, f64>,
}

impl CellSums {
    pub fn add(&mut self, cell: CellId, value: f64) {
        *self.sums.entry(cell).or_insert(0.0) += value;
    }

    /// Combines two partial sums; associative and commutative.
    pub fn merge(mut self, other: Self) -> Self {
        let (mut larger, smaller) = if self.sums.len() >= other.sums.len() {
            (std::mem::take(&mut self.sums), other.sums)
        } else {
            (other.sums, std::mem::take(&mut self.sums))
        };
        for (cell, value) in smaller {
            *larger.entry(cell).or_insert(0.0) += value;
        }
        Self { sums: larger }
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    pub fn into_table(self, name: impl Into<String>) -> FeatureTable {
        FeatureTable::from_values(name, self.sums)
    }
}

/// Result of aggregating one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterAggregation {
    pub table: FeatureTable,
    pub pixels_aggregated: usize,
    pub skipped_nodata: usize,
    pub invalid_coordinates: usize,
}

#[derive(Default)]
struct Partial {
    sums: CellSums,
    aggregated: usize,
    nodata: usize,
    invalid: usize,
}

impl Partial {
    fn merge(self, other: Self) -> Self {
        Self {
            sums: self.sums.merge(other.sums),
            aggregated: self.aggregated + other.aggregated,
            nodata: self.nodata + other.nodata,
            invalid: self.invalid + other.invalid,
        }
    }
}

/// Rows summed together by one parallel task. Chunk boundaries are fixed so
/// per-cell float sums come out bit-identical on every run.
const ROW_CHUNK: usize = 64;

/// Sums the raster's pixels per cell into a feature column named `column`.
pub fn aggregate_raster(
    grid: &RasterGrid,
    column: &str,
    indexer: &GridIndexer,
    anchor: PixelAnchor,
) -> RasterAggregation {
    let offset = anchor.offset();
    let chunks = grid.height().div_ceil(ROW_CHUNK);
    let partials: Vec<Partial> = (0..chunks)
        .into_par_iter()
        .map(|chunk| {
            let mut acc = Partial::default();
            let rows = chunk * ROW_CHUNK..((chunk + 1) * ROW_CHUNK).min(grid.height());
            for row in rows {
                for (col, &value) in grid.row(row).iter().enumerate() {
                    if grid.is_nodata(value) {
                        acc.nodata += 1;
                        continue;
                    }
                    let (lon, lat) = grid
                        .transform
                        .apply(col as f64 + offset, row as f64 + offset);
                    match indexer.index(lat, lon) {
                        Ok(cell) => {
                            acc.sums.add(cell, value);
                            acc.aggregated += 1;
                        }
                        Err(_) => acc.invalid += 1,
                    }
                }
            }
            acc
        })
        .collect();
    let partial = partials.into_iter().fold(Partial::default(), Partial::merge);

    RasterAggregation {
        table: partial.sums.into_table(column),
        pixels_aggregated: partial.aggregated,
        skipped_nodata: partial.nodata,
        invalid_coordinates: partial.invalid,
    }
}

/// One raster file and the feature label its values represent.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterJob {
    pub label: String,
    pub path: PathBuf,
}

/// Tables produced from a batch of sources together with one outcome per source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceBatch {
    pub tables: Vec<FeatureTable>,
    pub outcomes: Vec<SourceOutcome>,
}

/// Reads and aggregates every raster concurrently. A source that cannot be
/// read is logged and reported as failed; the others still contribute.
#[instrument(level = "info", skip_all, fields(sources = jobs.len(), resolution = indexer.resolution()))]
pub fn aggregate_sources(
    jobs: &[RasterJob],
    indexer: &GridIndexer,
    anchor: PixelAnchor,
) -> SourceBatch {
    let results: Vec<(String, Result<RasterAggregation>)> = jobs
        .par_iter()
        .map(|job| {
            let column = feature_column(&job.label);
            let result = raster_read::read_ascii_grid(&job.path)
                .map(|grid| aggregate_raster(&grid, &column, indexer, anchor));
            (job.path.display().to_string(), result)
        })
        .collect();

    let mut batch = SourceBatch::default();
    for (source, result) in results {
        match result {
            Ok(aggregation) => {
                info!(
                    %source,
                    column = aggregation.table.name(),
                    cells = aggregation.table.len(),
                    pixels = aggregation.pixels_aggregated,
                    "aggregated raster source"
                );
                if aggregation.invalid_coordinates > 0 {
                    warn!(
                        %source,
                        invalid = aggregation.invalid_coordinates,
                        "pixels mapped outside the valid coordinate range were excluded"
                    );
                }
                batch.outcomes.push(SourceOutcome {
                    source,
                    kind: SourceKind::Raster,
                    status: SourceStatus::Aggregated {
                        cells: aggregation.table.len(),
                        records: aggregation.pixels_aggregated,
                        skipped_nodata: aggregation.skipped_nodata,
                        invalid_records: aggregation.invalid_coordinates,
                    },
                });
                batch.tables.push(aggregation.table);
            }
            Err(error) => {
                warn!(%source, %error, "skipping raster source");
                batch
                    .outcomes
                    .push(SourceOutcome::failed(source, SourceKind::Raster, error));
            }
        }
    }
    debug!(tables = batch.tables.len(), "raster batch complete");
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_sums_are_reproducible() {
        let (width, height) = (40, 3 * ROW_CHUNK + 7);
        let values = (0..width * height)
            .map(|index| (index % 97) as f64 * 0.1 + 1e-7 * index as f64)
            .collect();
        let transform = GeoTransform::north_up(36.0, -1.0, 0.001, -0.001);
        let grid = RasterGrid::new(width, height, values, transform, None).expect("raster");
        let indexer = GridIndexer::new(7).expect("resolution");

        let first = aggregate_raster(&grid, "population_m0", &indexer, PixelAnchor::Center);
        for _ in 0..4 {
            let again = aggregate_raster(&grid, "population_m0", &indexer, PixelAnchor::Center);
            let bits = |table: &FeatureTable| -> Vec<u64> {
                table.iter().map(|(_, value)| value.to_bits()).collect()
            };
            assert_eq!(bits(&again.table), bits(&first.table));
        }
        assert_eq!(first.pixels_aggregated, width * height);
    }

    #[test]
    fn nan_pixels_count_as_nodata() {
        let transform = GeoTransform::north_up(36.0, -1.0, 0.01, -0.01);
        let grid = RasterGrid::new(2, 1, vec![f64::NAN, 3.0], transform, Some(-9999.0))
            .expect("raster");
        let aggregation =
            aggregate_raster(&grid, "population_f0", &GridIndexer::default(), PixelAnchor::Corner);
        assert_eq!(aggregation.skipped_nodata, 1);
        assert_eq!(aggregation.table.total(), 3.0);
    }
}
