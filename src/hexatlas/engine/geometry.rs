//! Planar geometry primitives used by the spatial attributor.
//!
//! Coordinates are `x = longitude`, `y = latitude` in degrees. Distances are
//! planar in that frame, which is an approximation at country scale.

use serde::Serialize;

use crate::hexatlas::engine::error::{EngineError, Result};

/// Tolerance for deciding that a point lies on a polygon edge.
const EDGE_TOLERANCE: f64 = 1e-12;

/// A planar coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Builds a coordinate from a latitude/longitude pair.
    pub fn from_lat_lon(lat: f64, lon: f64) -> Self {
        Self { x: lon, y: lat }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    fn from_coords<'a>(coords: impl IntoIterator<Item = &'a Coord>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut bbox = Self {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for coord in iter {
            bbox.min_x = bbox.min_x.min(coord.x);
            bbox.min_y = bbox.min_y.min(coord.y);
            bbox.max_x = bbox.max_x.max(coord.x);
            bbox.max_y = bbox.max_y.max(coord.y);
        }
        Some(bbox)
    }

    fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Whether the point lies inside or on the box.
    pub fn contains(&self, point: Coord) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    /// Lower bound on the distance from the point to anything inside the box.
    pub fn distance_to(&self, point: Coord) -> f64 {
        let dx = (self.min_x - point.x).max(0.0).max(point.x - self.max_x);
        let dy = (self.min_y - point.y).max(0.0).max(point.y - self.max_y);
        dx.hypot(dy)
    }
}

/// Where a point sits relative to an areal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Interior,
    Boundary,
    Exterior,
}

/// A closed ring. The closing vertex is implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    coords: Vec<Coord>,
}

impl Ring {
    /// Builds a ring from its vertices, dropping a repeated closing vertex.
    pub fn new(mut coords: Vec<Coord>) -> Result<Self> {
        if coords.len() > 1 && coords.first() == coords.last() {
            coords.pop();
        }
        if coords.len() < 3 {
            return Err(EngineError::InvalidGeometry(format!(
                "ring needs at least 3 distinct vertices, found {}",
                coords.len()
            )));
        }
        if coords.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(EngineError::InvalidGeometry(
                "ring contains a non-finite coordinate".into(),
            ));
        }
        Ok(Self { coords })
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    fn segments(&self) -> impl Iterator<Item = (Coord, Coord)> + '_ {
        let count = self.coords.len();
        (0..count).map(move |i| (self.coords[i], self.coords[(i + 1) % count]))
    }

    fn touches(&self, point: Coord) -> bool {
        self.segments().any(|(a, b)| on_segment(point, a, b))
    }

    /// Even-odd crossing test. Boundary points are resolved by [`Ring::touches`]
    /// before this is consulted.
    fn encloses(&self, point: Coord) -> bool {
        let mut inside = false;
        for (a, b) in self.segments() {
            if (a.y > point.y) != (b.y > point.y) {
                let x_cross = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
                if point.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn distance(&self, point: Coord) -> f64 {
        self.segments()
            .map(|(a, b)| segment_distance(point, a, b))
            .fold(f64::INFINITY, f64::min)
    }
}

/// A polygon with one exterior ring and optional holes.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    exterior: Ring,
    holes: Vec<Ring>,
}

impl Polygon {
    pub fn new(exterior: Ring, holes: Vec<Ring>) -> Self {
        Self { exterior, holes }
    }

    pub fn exterior(&self) -> &Ring {
        &self.exterior
    }

    pub fn locate(&self, point: Coord) -> Location {
        if self.exterior.touches(point) || self.holes.iter().any(|hole| hole.touches(point)) {
            return Location::Boundary;
        }
        if !self.exterior.encloses(point) || self.holes.iter().any(|hole| hole.encloses(point)) {
            return Location::Exterior;
        }
        Location::Interior
    }

    fn boundary_distance(&self, point: Coord) -> f64 {
        self.holes
            .iter()
            .map(|hole| hole.distance(point))
            .fold(self.exterior.distance(point), f64::min)
    }
}

/// One or more polygons forming a single region.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPolygon {
    polygons: Vec<Polygon>,
    bbox: BoundingBox,
}

impl MultiPolygon {
    pub fn new(polygons: Vec<Polygon>) -> Result<Self> {
        let bbox = polygons
            .iter()
            .filter_map(|polygon| BoundingBox::from_coords(polygon.exterior.coords()))
            .reduce(BoundingBox::union)
            .ok_or_else(|| EngineError::InvalidGeometry("geometry has no polygons".into()))?;
        Ok(Self { polygons, bbox })
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Interior wins over boundary across parts.
    pub fn locate(&self, point: Coord) -> Location {
        if !self.bbox.contains(point) {
            return Location::Exterior;
        }
        let mut location = Location::Exterior;
        for polygon in &self.polygons {
            match polygon.locate(point) {
                Location::Interior => return Location::Interior,
                Location::Boundary => location = Location::Boundary,
                Location::Exterior => {}
            }
        }
        location
    }

    /// Point lies strictly inside the interior.
    pub fn contains(&self, point: Coord) -> bool {
        self.locate(point) == Location::Interior
    }

    /// Point lies in the interior or on the boundary.
    pub fn intersects(&self, point: Coord) -> bool {
        self.locate(point) != Location::Exterior
    }

    /// Planar distance from the point to the geometry; zero when it intersects.
    pub fn distance(&self, point: Coord) -> f64 {
        if self.intersects(point) {
            return 0.0;
        }
        self.polygons
            .iter()
            .map(|polygon| polygon.boundary_distance(point))
            .fold(f64::INFINITY, f64::min)
    }
}

fn on_segment(point: Coord, a: Coord, b: Coord) -> bool {
    let length = (b.x - a.x).hypot(b.y - a.y);
    let cross = (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x);
    if cross.abs() > EDGE_TOLERANCE * length.max(1.0) {
        return false;
    }
    point.x >= a.x.min(b.x) - EDGE_TOLERANCE
        && point.x <= a.x.max(b.x) + EDGE_TOLERANCE
        && point.y >= a.y.min(b.y) - EDGE_TOLERANCE
        && point.y <= a.y.max(b.y) + EDGE_TOLERANCE
}

fn segment_distance(point: Coord, a: Coord, b: Coord) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return (point.x - a.x).hypot(point.y - a.y);
    }
    let t = (((point.x - a.x) * dx + (point.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    let px = a.x + t * dx;
    let py = a.y + t * dy;
    (point.x - px).hypot(point.y - py)
}

/// Convenience constructor for an axis-aligned rectangle.
pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<MultiPolygon> {
    let ring = Ring::new(vec![
        Coord::new(min_x, min_y),
        Coord::new(max_x, min_y),
        Coord::new(max_x, max_y),
        Coord::new(min_x, max_y),
    ])?;
    MultiPolygon::new(vec![Polygon::new(ring, Vec::new())])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_with_hole() -> MultiPolygon {
        let exterior = Ring::new(vec![
            Coord::new(0.0, 0.0),
            Coord::new(4.0, 0.0),
            Coord::new(4.0, 4.0),
            Coord::new(0.0, 4.0),
            Coord::new(0.0, 0.0),
        ])
        .unwrap();
        let hole = Ring::new(vec![
            Coord::new(1.0, 1.0),
            Coord::new(2.0, 1.0),
            Coord::new(2.0, 2.0),
            Coord::new(1.0, 2.0),
        ])
        .unwrap();
        MultiPolygon::new(vec![Polygon::new(exterior, vec![hole])]).unwrap()
    }

    #[test]
    fn locates_interior_boundary_and_exterior() {
        let shape = square_with_hole();
        assert_eq!(shape.locate(Coord::new(3.0, 3.0)), Location::Interior);
        assert_eq!(shape.locate(Coord::new(4.0, 2.5)), Location::Boundary);
        assert_eq!(shape.locate(Coord::new(0.0, 0.0)), Location::Boundary);
        assert_eq!(shape.locate(Coord::new(5.0, 2.0)), Location::Exterior);
    }

    #[test]
    fn hole_is_exterior_and_its_edge_is_boundary() {
        let shape = square_with_hole();
        assert_eq!(shape.locate(Coord::new(1.5, 1.5)), Location::Exterior);
        assert_eq!(shape.locate(Coord::new(1.5, 1.0)), Location::Boundary);
        assert!((shape.distance(Coord::new(1.5, 1.1)) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn distance_is_zero_inside_and_planar_outside() {
        let shape = rectangle(0.0, 0.0, 1.0, 1.0).unwrap();
        assert_eq!(shape.distance(Coord::new(0.5, 0.5)), 0.0);
        assert!((shape.distance(Coord::new(2.0, 0.5)) - 1.0).abs() < 1e-12);
        assert!((shape.distance(Coord::new(4.0, 5.0)) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn bounding_box_distance_is_a_lower_bound() {
        let shape = square_with_hole();
        let point = Coord::new(7.0, 8.0);
        assert!(shape.bbox().distance_to(point) <= shape.distance(point));
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let result = Ring::new(vec![Coord::new(0.0, 0.0), Coord::new(1.0, 1.0)]);
        assert!(matches!(result, Err(EngineError::InvalidGeometry(_))));
    }
}
