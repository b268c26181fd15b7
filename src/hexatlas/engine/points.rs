//! Point layer → hexagon counts.

use std::collections::BTreeMap;

use crate::hexatlas::engine::grid::GridIndexer;
use crate::hexatlas::engine::model::FeatureTable;
use crate::hexatlas::engine::raster::CellSums;

/// A located point, optionally tagged with a category (e.g. an amenity class).
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub category: Option<String>,
}

/// Counts produced from one point layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PointAggregation {
    pub tables: Vec<FeatureTable>,
    pub points_counted: usize,
    pub invalid_coordinates: usize,
}

/// Counts points per cell into a single feature column.
pub fn aggregate_points(points: &[PointRecord], indexer: &GridIndexer, column: &str) -> PointAggregation {
    let mut sums = CellSums::default();
    let mut counted = 0;
    let mut invalid = 0;
    for point in points {
        match indexer.index(point.latitude, point.longitude) {
            Ok(cell) => {
                sums.add(cell, 1.0);
                counted += 1;
            }
            Err(_) => invalid += 1,
        }
    }
    PointAggregation {
        tables: vec![sums.into_table(column)],
        points_counted: counted,
        invalid_coordinates: invalid,
    }
}

/// Counts points per cell and category, one column `<prefix>_<category>` per
/// distinct category in sorted order. Points without a category are skipped.
pub fn aggregate_point_categories(
    points: &[PointRecord],
    indexer: &GridIndexer,
    prefix: &str,
) -> PointAggregation {
    let mut by_category: BTreeMap<&str, CellSums> = BTreeMap::new();
    let mut counted = 0;
    let mut invalid = 0;
    for point in points {
        let Some(category) = point.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
        else {
            continue;
        };
        match indexer.index(point.latitude, point.longitude) {
            Ok(cell) => {
                by_category.entry(category).or_default().add(cell, 1.0);
                counted += 1;
            }
            Err(_) => invalid += 1,
        }
    }
    let tables = by_category
        .into_iter()
        .map(|(category, sums)| sums.into_table(format!("{prefix}_{category}")))
        .collect();
    PointAggregation {
        tables,
        points_counted: counted,
        invalid_coordinates: invalid,
    }
}
