use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::geometry::{Coord, MultiPolygon, Polygon, Ring};
use crate::hexatlas::engine::model::AdminPolygon;

/// Polygons read from one vector source, plus the features that were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonLayer {
    pub polygons: Vec<AdminPolygon>,
    pub skipped_features: usize,
}

/// Reads a GeoJSON file of administrative boundaries. Any failure to open or
/// parse the document is reported as [`EngineError::SourceRead`].
pub fn read_admin_polygons(path: &Path, level: &str, name_property: &str) -> Result<PolygonLayer> {
    let source_name = path.display().to_string();
    let text =
        fs::read_to_string(path).map_err(|err| EngineError::source_read(&source_name, err))?;
    let document: Value =
        serde_json::from_str(&text).map_err(|err| EngineError::source_read(&source_name, err))?;
    parse_admin_polygons(&document, level, name_property)
        .map_err(|err| EngineError::source_read(source_name, err))
}

/// Converts a GeoJSON `FeatureCollection` (or single `Feature`) into
/// [`AdminPolygon`]s in document order. Features without a name or without
/// an areal geometry are skipped.
pub fn parse_admin_polygons(document: &Value, level: &str, name_property: &str) -> Result<PolygonLayer> {
    let features: Vec<&Value> = match document.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => document
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::InvalidGeometry("FeatureCollection without features".into()))?
            .iter()
            .collect(),
        Some("Feature") => vec![document],
        other => {
            return Err(EngineError::InvalidGeometry(format!(
                "expected a GeoJSON FeatureCollection or Feature, found {other:?}"
            )));
        }
    };

    let mut layer = PolygonLayer {
        polygons: Vec::with_capacity(features.len()),
        skipped_features: 0,
    };

    for (position, feature) in features.into_iter().enumerate() {
        let name = feature
            .get("properties")
            .and_then(|properties| properties.get(name_property))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(name) = name else {
            warn!(position, name_property, "feature has no region name, skipping");
            layer.skipped_features += 1;
            continue;
        };
        match feature.get("geometry").map(parse_geometry) {
            Some(Ok(Some(geometry))) => layer
                .polygons
                .push(AdminPolygon::new(name, level, geometry)),
            Some(Ok(None)) | None => {
                warn!(position, region = name, "feature is not a polygon, skipping");
                layer.skipped_features += 1;
            }
            Some(Err(error)) => {
                warn!(position, region = name, %error, "invalid feature geometry, skipping");
                layer.skipped_features += 1;
            }
        }
    }

    Ok(layer)
}

/// Returns `Ok(None)` for geometry types that carry no area.
fn parse_geometry(geometry: &Value) -> Result<Option<MultiPolygon>> {
    let coordinates = geometry.get("coordinates");
    match geometry.get("type").and_then(Value::as_str) {
        Some("Polygon") => {
            let polygon = parse_polygon(coordinates.ok_or_else(missing_coordinates)?)?;
            MultiPolygon::new(vec![polygon]).map(Some)
        }
        Some("MultiPolygon") => {
            let polygons = coordinates
                .and_then(Value::as_array)
                .ok_or_else(missing_coordinates)?
                .iter()
                .map(parse_polygon)
                .collect::<Result<Vec<_>>>()?;
            MultiPolygon::new(polygons).map(Some)
        }
        _ => Ok(None),
    }
}

fn parse_polygon(value: &Value) -> Result<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| EngineError::InvalidGeometry("polygon must be an array of rings".into()))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| EngineError::InvalidGeometry("polygon has no exterior ring".into()))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, holes))
}

fn parse_ring(value: &Value) -> Result<Ring> {
    let positions = value
        .as_array()
        .ok_or_else(|| EngineError::InvalidGeometry("ring must be an array of positions".into()))?;
    let coords = positions
        .iter()
        .map(|position| {
            let x = position.get(0).and_then(Value::as_f64);
            let y = position.get(1).and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord::new(x, y)),
                _ => Err(EngineError::InvalidGeometry(format!(
                    "invalid position {position}"
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ring::new(coords)
}

fn missing_coordinates() -> EngineError {
    EngineError::InvalidGeometry("geometry has no coordinates".into())
}
