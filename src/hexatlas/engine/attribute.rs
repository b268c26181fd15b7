//! Cascading spatial attribution of cells to administrative regions.
//!
//! Each cell centroid is tried against the level's polygons in three stages:
//! strictly `within` an interior, then boundary-inclusive `intersects`, then
//! the `nearest` polygon by planar distance. Ties in every stage go to the
//! polygon that comes first in input order. An R-tree over polygon bounding
//! boxes narrows candidates but never changes the outcome.

use rayon::prelude::*;
use rstar::{AABB, Envelope, PointDistance, RTree, RTreeObject};
use tracing::{info, instrument};

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::geometry::Coord;
use crate::hexatlas::engine::model::{
    AdminPolygon, Attribution, AttributionTable, CellId, MatchStage, ReconciledTable, StageCounts,
};

/// Relative slack applied when comparing envelope lower bounds against exact
/// distances, so equal-distance candidates are never pruned by rounding.
const PRUNE_SLACK: f64 = 1e-9;

#[derive(Debug, Clone)]
struct PolygonEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for PolygonEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope.distance_2(point)
    }
}

/// Read-only spatial index over one level's polygons.
pub struct PolygonIndex<'a> {
    polygons: &'a [AdminPolygon],
    tree: RTree<PolygonEntry>,
}

impl<'a> PolygonIndex<'a> {
    /// Builds the index. An empty polygon set is fatal for the level.
    pub fn new(level: &str, polygons: &'a [AdminPolygon]) -> Result<Self> {
        if polygons.is_empty() {
            return Err(EngineError::NoPolygons {
                level: level.to_string(),
            });
        }
        let entries = polygons
            .iter()
            .enumerate()
            .map(|(index, polygon)| {
                let bbox = polygon.geometry.bbox();
                PolygonEntry {
                    index,
                    envelope: AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]),
                }
            })
            .collect();
        Ok(Self {
            polygons,
            tree: RTree::bulk_load(entries),
        })
    }

    pub fn polygons(&self) -> &[AdminPolygon] {
        self.polygons
    }

    /// Polygon indices whose bounding box covers the point, in input order.
    fn candidates(&self, point: Coord) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point([point.x, point.y]))
            .map(|entry| entry.index)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Stage 1: first polygon whose interior strictly contains the point.
    pub fn within(&self, point: Coord) -> Option<usize> {
        self.candidates(point)
            .into_iter()
            .find(|&index| self.polygons[index].geometry.contains(point))
    }

    /// Stage 2: first polygon touching the point, boundary included.
    pub fn intersecting(&self, point: Coord) -> Option<usize> {
        self.candidates(point)
            .into_iter()
            .find(|&index| self.polygons[index].geometry.intersects(point))
    }

    /// Stage 3: polygon at minimum planar distance, first-minimal on ties.
    pub fn nearest(&self, point: Coord) -> usize {
        let mut best = (self.polygons[0].geometry.distance(point), 0);
        for (entry, envelope_distance_2) in self
            .tree
            .nearest_neighbor_iter_with_distance_2(&[point.x, point.y])
        {
            let (best_distance, _) = best;
            if envelope_distance_2.sqrt() > best_distance * (1.0 + PRUNE_SLACK) + f64::EPSILON {
                break;
            }
            let distance = self.polygons[entry.index].geometry.distance(point);
            if (distance, entry.index) < best {
                best = (distance, entry.index);
            }
        }
        best.1
    }

    /// Runs the full cascade for one point.
    pub fn attribute(&self, point: Coord) -> (usize, MatchStage) {
        if let Some(index) = self.within(point) {
            return (index, MatchStage::Within);
        }
        if let Some(index) = self.intersecting(point) {
            return (index, MatchStage::Intersects);
        }
        (self.nearest(point), MatchStage::Nearest)
    }
}

/// Attributes every `(cell, lat, lon)` centroid to one polygon of the level.
#[instrument(level = "info", skip(cells, polygons), fields(cells = cells.len(), polygons = polygons.len()))]
pub fn attribute_cells(
    level: &str,
    cells: &[(CellId, f64, f64)],
    polygons: &[AdminPolygon],
) -> Result<AttributionTable> {
    let index = PolygonIndex::new(level, polygons)?;

    let resolved: Vec<(CellId, Attribution)> = cells
        .par_iter()
        .map(|(cell, lat, lon)| {
            let (polygon, stage) = index.attribute(Coord::from_lat_lon(*lat, *lon));
            let attribution = Attribution {
                region: polygons[polygon].name.clone(),
                stage,
            };
            (cell.clone(), attribution)
        })
        .collect();

    let mut counts = StageCounts::default();
    for (_, attribution) in &resolved {
        counts.record(attribution.stage);
    }
    info!(
        level,
        within = counts.within,
        intersects = counts.intersects,
        nearest = counts.nearest,
        "cells attributed"
    );

    Ok(AttributionTable {
        level: level.to_string(),
        assignments: resolved.into_iter().collect(),
        counts,
    })
}

/// Attributes the centroids of every reconciled record.
pub fn attribute_records(
    level: &str,
    table: &ReconciledTable,
    polygons: &[AdminPolygon],
) -> Result<AttributionTable> {
    let cells: Vec<(CellId, f64, f64)> = table
        .records
        .iter()
        .map(|record| (record.cell().clone(), record.latitude(), record.longitude()))
        .collect();
    attribute_cells(level, &cells, polygons)
}
