//! Hexagonal grid indexing backed by the H3 tessellation.
//!
//! Cell identifiers are the canonical lowercase hexadecimal rendering of the
//! H3 index, which already encodes the resolution.

use std::str::FromStr;

use h3o::{CellIndex, LatLng, Resolution};

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::geometry::{Coord, MultiPolygon, Polygon, Ring};
use crate::hexatlas::engine::model::{CellId, GridCell};

/// Resolution used when the manifest does not override it (~0.7 km² cells).
pub const DEFAULT_RESOLUTION: u8 = 8;

/// Maps coordinates to cells at one fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndexer {
    resolution: Resolution,
}

impl GridIndexer {
    pub fn new(resolution: u8) -> Result<Self> {
        Ok(Self {
            resolution: to_resolution(resolution)?,
        })
    }

    pub fn resolution(&self) -> u8 {
        u8::from(self.resolution)
    }

    /// Cell identifier containing the coordinate.
    pub fn index(&self, lat: f64, lon: f64) -> Result<CellId> {
        let cell = lat_lng(lat, lon)?.to_cell(self.resolution);
        Ok(CellId::new(cell.to_string()))
    }

    /// Full cell description for the coordinate.
    pub fn cell(&self, lat: f64, lon: f64) -> Result<GridCell> {
        let id = self.index(lat, lon)?;
        let (latitude, longitude) = centroid(&id)?;
        Ok(GridCell {
            id,
            resolution: self.resolution(),
            latitude,
            longitude,
        })
    }
}

impl Default for GridIndexer {
    fn default() -> Self {
        Self {
            resolution: Resolution::Eight,
        }
    }
}

/// Cell identifier for `(lat, lon)` at `resolution`.
pub fn index(lat: f64, lon: f64, resolution: u8) -> Result<CellId> {
    GridIndexer::new(resolution)?.index(lat, lon)
}

/// Representative centroid `(lat, lon)` of the cell.
pub fn centroid(cell: &CellId) -> Result<(f64, f64)> {
    let center = LatLng::from(decode(cell.as_str())?);
    Ok((center.lat(), center.lng()))
}

/// Hexagon (or pentagon) outline of the cell as a planar polygon.
pub fn boundary(cell: &CellId) -> Result<MultiPolygon> {
    let index = decode(cell.as_str())?;
    let vertices = index
        .boundary()
        .iter()
        .map(|vertex| Coord::from_lat_lon(vertex.lat(), vertex.lng()))
        .collect();
    MultiPolygon::new(vec![Polygon::new(Ring::new(vertices)?, Vec::new())])
}

/// Resolution encoded in the identifier.
pub fn resolution_of(cell: &CellId) -> Result<u8> {
    Ok(u8::from(decode(cell.as_str())?.resolution()))
}

/// Validates a textual identifier and returns it in canonical form.
pub fn parse_cell(text: &str) -> Result<CellId> {
    let index = decode(text)?;
    Ok(CellId::new(index.to_string()))
}

fn decode(text: &str) -> Result<CellIndex> {
    CellIndex::from_str(text.trim()).map_err(|_| EngineError::InvalidCellId(text.to_string()))
}

fn to_resolution(resolution: u8) -> Result<Resolution> {
    Resolution::try_from(resolution).map_err(|_| EngineError::InvalidResolution(resolution))
}

fn lat_lng(lat: f64, lon: f64) -> Result<LatLng> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(EngineError::InvalidCoordinate { lat, lon });
    }
    LatLng::new(lat, lon).map_err(|_| EngineError::InvalidCoordinate { lat, lon })
}
