//! Vector geometries used to define spatial regions of interest
//!
//! A [`Geometry`] is one or more polygons (each with an exterior ring and optional holes)
//! expressed in a declared [`ReferenceSystem`]. Coordinates are `[x, y]` pairs, which for
//! geographic reference systems means `[longitude, latitude]` in degrees.
//!
//! Geometries are validated before use: empty rings, non-finite vertices, zero area and
//! self-intersecting rings are rejected with [`AggError::InvalidGeometry`].
//!
//! # Examples
//!
//! ```rust
//! use gridagg_core::geometry::{Geometry, Polygon};
//!
//! let square = Polygon::new(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]);
//! let geometry = Geometry::new(vec![square]).with_id("box");
//!
//! geometry.validate().unwrap();
//! assert_eq!(geometry.area(), 100.0);
//! assert!(geometry.contains([5.0, 5.0]));
//! ```

use crate::errors::{AggError, AggResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A vertex as `[x, y]`
pub type Point = [f64; 2];

/// Identifier of a coordinate reference system such as `"EPSG:4326"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceSystem(pub String);

impl ReferenceSystem {
    /// WGS84 longitude/latitude
    pub fn wgs84() -> Self {
        ReferenceSystem("EPSG:4326".to_string())
    }

    /// Whether coordinates are longitude/latitude in degrees
    pub fn is_geographic(&self) -> bool {
        matches!(
            self.0.to_ascii_uppercase().as_str(),
            "EPSG:4326" | "WGS84" | "OGC:CRS84" | "LONLAT"
        )
    }
}

impl Default for ReferenceSystem {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl fmt::Display for ReferenceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Smallest box containing all `points`
    ///
    /// Returns `None` for an empty iterator.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox {
            min_x: first[0],
            min_y: first[1],
            max_x: first[0],
            max_y: first[1],
        };
        for p in iter {
            bbox.min_x = bbox.min_x.min(p[0]);
            bbox.min_y = bbox.min_y.min(p[1]);
            bbox.max_x = bbox.max_x.max(p[0]);
            bbox.max_y = bbox.max_y.max(p[1]);
        }
        Some(bbox)
    }

    /// Whether the boxes share any area or boundary
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn translate_x(&self, dx: f64) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x + dx,
            max_x: self.max_x + dx,
            ..*self
        }
    }
}

/// A polygon with one exterior ring and zero or more holes
///
/// Rings may be given open or closed (first vertex repeated at the end) and in either
/// orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    #[serde(default)]
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>) -> Self {
        Self {
            exterior,
            holes: vec![],
        }
    }

    pub fn with_hole(mut self, hole: Vec<Point>) -> Self {
        self.holes.push(hole);
        self
    }

    /// Axis-aligned rectangle from `(min_x, min_y)` to `(max_x, max_y)`
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(vec![
            [min_x, min_y],
            [max_x, min_y],
            [max_x, max_y],
            [min_x, max_y],
        ])
    }

    /// Area of the exterior minus the area of the holes
    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| ring_area(h).abs()).sum();
        ring_area(&self.exterior).abs() - holes
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.exterior)
    }

    /// Point-in-polygon test (even-odd rule over the exterior and the holes)
    pub fn contains(&self, p: Point) -> bool {
        ring_contains(&self.exterior, p) && !self.holes.iter().any(|h| ring_contains(h, p))
    }

    /// Area of the intersection with a convex, counter-clockwise `cell`
    pub fn intersection_area(&self, cell: &[Point]) -> f64 {
        let outer = ring_area(&clip_to_convex(&self.exterior, cell)).abs();
        if outer == 0.0 {
            return 0.0;
        }
        let holes: f64 = self
            .holes
            .iter()
            .map(|h| ring_area(&clip_to_convex(h, cell)).abs())
            .sum();
        (outer - holes).max(0.0)
    }

    fn translate_x(&self, dx: f64) -> Polygon {
        let shift = |ring: &Vec<Point>| ring.iter().map(|p| [p[0] + dx, p[1]]).collect();
        Polygon {
            exterior: shift(&self.exterior),
            holes: self.holes.iter().map(shift).collect(),
        }
    }

    fn rings(&self) -> impl Iterator<Item = &Vec<Point>> {
        std::iter::once(&self.exterior).chain(self.holes.iter())
    }
}

/// One or more polygons with a reference system and an optional identifier
///
/// Multi-polygons are treated as the union of non-overlapping parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub polygons: Vec<Polygon>,
    #[serde(default)]
    pub crs: ReferenceSystem,
    #[serde(default)]
    pub id: Option<String>,
}

impl Geometry {
    /// Create a geometry in WGS84 longitude/latitude
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self {
            polygons,
            crs: ReferenceSystem::default(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_crs(mut self, crs: ReferenceSystem) -> Self {
        self.crs = crs;
        self
    }

    /// Check that the geometry can be rasterised
    ///
    /// # Errors
    ///
    /// Returns [`AggError::InvalidGeometry`] if there are no polygons, a ring has fewer
    /// than three distinct vertices or a non-finite vertex, a ring crosses itself, or the
    /// total area is zero.
    pub fn validate(&self) -> AggResult<()> {
        let name = self.id.as_deref().unwrap_or("<unnamed>");
        if self.polygons.is_empty() {
            return Err(AggError::InvalidGeometry(format!(
                "geometry {name} has no polygons"
            )));
        }
        for (i, polygon) in self.polygons.iter().enumerate() {
            for ring in polygon.rings() {
                if ring.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
                    return Err(AggError::InvalidGeometry(format!(
                        "polygon {i} of geometry {name} has a non-finite vertex"
                    )));
                }
                let ring = open_ring(ring);
                if ring.len() < 3 {
                    return Err(AggError::InvalidGeometry(format!(
                        "polygon {i} of geometry {name} has a ring with fewer than 3 vertices"
                    )));
                }
                if ring_self_intersects(ring) {
                    return Err(AggError::InvalidGeometry(format!(
                        "polygon {i} of geometry {name} is self-intersecting"
                    )));
                }
            }
        }
        if self.area() <= 0.0 {
            return Err(AggError::InvalidGeometry(format!(
                "geometry {name} has zero area"
            )));
        }
        Ok(())
    }

    /// Planar area in the units of the reference system
    pub fn area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.polygons
            .iter()
            .filter_map(Polygon::bbox)
            .reduce(|a, b| a.union(&b))
    }

    pub fn contains(&self, p: Point) -> bool {
        self.polygons.iter().any(|poly| poly.contains(p))
    }

    /// Copy of the geometry shifted along x
    ///
    /// Used to match longitude conventions (-180..180 vs 0..360).
    pub fn translate_x(&self, dx: f64) -> Geometry {
        Geometry {
            polygons: self.polygons.iter().map(|p| p.translate_x(dx)).collect(),
            crs: self.crs.clone(),
            id: self.id.clone(),
        }
    }

    /// Exact bit pattern of the vertices and ring structure
    ///
    /// The identifier is not part of the key: two geometries with the same shape
    /// share rasterised weights. The reference system is kept separately by the cache.
    pub fn shape_key(&self) -> Vec<u64> {
        let mut key = Vec::new();
        for polygon in &self.polygons {
            key.push(polygon.holes.len() as u64);
            for ring in polygon.rings() {
                key.push(ring.len() as u64);
                key.extend(ring.iter().flat_map(|p| [p[0].to_bits(), p[1].to_bits()]));
            }
        }
        key
    }

    /// Label used in result coordinates and provenance records
    pub fn label(&self, fallback: usize) -> String {
        self.id.clone().unwrap_or_else(|| fallback.to_string())
    }
}

/// Transformation of geometries between reference systems
///
/// Reprojection is delegated to the caller; the engine only invokes it when a geometry's
/// reference system differs from the grid's.
pub trait Reproject: Send + Sync {
    fn reproject(&self, geometry: &Geometry, target: &ReferenceSystem) -> AggResult<Geometry>;
}

/// Ring without the repeated closing vertex
fn open_ring(ring: &[Point]) -> &[Point] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Signed shoelace area, positive for counter-clockwise rings
pub fn ring_area(ring: &[Point]) -> f64 {
    let ring = open_ring(ring);
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a[0] * b[1] - b[0] * a[1]
        })
        .sum();
    twice / 2.0
}

/// Even-odd ray casting
pub fn ring_contains(ring: &[Point], p: Point) -> bool {
    let ring = open_ring(ring);
    let n = ring.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a[1] > p[1]) != (b[1] > p[1]) {
            let x = (b[0] - a[0]) * (p[1] - a[1]) / (b[1] - a[1]) + a[0];
            if p[0] < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p[0] >= a[0].min(b[0])
        && p[0] <= a[0].max(b[0])
        && p[1] >= a[1].min(b[1])
        && p[1] <= a[1].max(b[1])
}

fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// Whether two non-adjacent edges of an open ring touch
fn ring_self_intersects(ring: &[Point]) -> bool {
    let n = ring.len();
    for i in 0..n {
        let (a1, a2) = (ring[i], ring[(i + 1) % n]);
        for j in (i + 1)..n {
            // Adjacent edges share a vertex
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let (b1, b2) = (ring[j], ring[(j + 1) % n]);
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

/// Clip `subject` against a convex counter-clockwise polygon (Sutherland-Hodgman)
///
/// The result is the part of `subject` inside `clip`. Concave subjects may produce
/// degenerate zero-width bridges along the clip boundary; these carry no area.
pub fn clip_to_convex(subject: &[Point], clip: &[Point]) -> Vec<Point> {
    let clip = open_ring(clip);
    let mut output: Vec<Point> = open_ring(subject).to_vec();
    let n = clip.len();
    for i in 0..n {
        if output.is_empty() {
            break;
        }
        let (c1, c2) = (clip[i], clip[(i + 1) % n]);
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &current in &input {
            let current_inside = cross(c1, c2, current) >= 0.0;
            let prev_inside = cross(c1, c2, prev) >= 0.0;
            if current_inside {
                if !prev_inside {
                    output.push(line_intersection(prev, current, c1, c2));
                }
                output.push(current);
            } else if prev_inside {
                output.push(line_intersection(prev, current, c1, c2));
            }
            prev = current;
        }
    }
    output
}

fn line_intersection(p1: Point, p2: Point, q1: Point, q2: Point) -> Point {
    let d = (p1[0] - p2[0]) * (q1[1] - q2[1]) - (p1[1] - p2[1]) * (q1[0] - q2[0]);
    if d == 0.0 {
        return p2;
    }
    let a = p1[0] * p2[1] - p1[1] * p2[0];
    let b = q1[0] * q2[1] - q1[1] * q2[0];
    [
        (a * (q1[0] - q2[0]) - (p1[0] - p2[0]) * b) / d,
        (a * (q1[1] - q2[1]) - (p1[1] - p2[1]) * b) / d,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;

    fn unit_cell() -> Vec<Point> {
        vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]
    }

    #[test]
    fn shoelace_orientation() {
        let ccw = unit_cell();
        let cw: Vec<Point> = ccw.iter().rev().copied().collect();
        assert_eq!(ring_area(&ccw), 1.0);
        assert_eq!(ring_area(&cw), -1.0);
    }

    #[test]
    fn closed_and_open_rings_agree() {
        let mut closed = unit_cell();
        closed.push([0.0, 0.0]);
        assert_eq!(ring_area(&closed), ring_area(&unit_cell()));
    }

    #[test]
    fn hole_is_subtracted() {
        let polygon = Polygon::rectangle(0.0, 0.0, 4.0, 4.0)
            .with_hole(Polygon::rectangle(1.0, 1.0, 2.0, 2.0).exterior);
        assert_eq!(polygon.area(), 15.0);
        assert!(polygon.contains([3.0, 3.0]));
        assert!(!polygon.contains([1.5, 1.5]));
    }

    #[test]
    fn bowtie_is_rejected() {
        let bowtie = Geometry::new(vec![Polygon::new(vec![
            [0.0, 0.0],
            [1.0, 1.0],
            [1.0, 0.0],
            [0.0, 1.0],
        ])]);
        assert!(matches!(
            bowtie.validate(),
            Err(AggError::InvalidGeometry(msg)) if msg.contains("self-intersecting")
        ));
    }

    #[test]
    fn zero_area_is_rejected() {
        let line = Geometry::new(vec![Polygon::new(vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [2.0, 0.0],
        ])]);
        assert!(matches!(line.validate(), Err(AggError::InvalidGeometry(_))));
    }

    #[test]
    fn empty_geometry_is_rejected() {
        assert!(Geometry::new(vec![]).validate().is_err());
        let degenerate = Geometry::new(vec![Polygon::new(vec![[0.0, 0.0], [1.0, 1.0]])]);
        assert!(degenerate.validate().is_err());
    }

    #[test]
    fn clip_partial_overlap() {
        let subject = Polygon::rectangle(0.5, 0.5, 2.0, 2.0);
        let clipped = clip_to_convex(&subject.exterior, &unit_cell());
        assert!(is_close!(ring_area(&clipped).abs(), 0.25));
    }

    #[test]
    fn clip_disjoint() {
        let subject = Polygon::rectangle(2.0, 2.0, 3.0, 3.0);
        assert_eq!(ring_area(&clip_to_convex(&subject.exterior, &unit_cell())), 0.0);
    }

    #[test]
    fn clip_triangle_inside_cell() {
        let triangle = vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let clipped = clip_to_convex(&triangle, &unit_cell());
        assert!(is_close!(ring_area(&clipped).abs(), 0.5));
    }

    #[test]
    fn intersection_area_with_hole() {
        let polygon = Polygon::rectangle(-1.0, -1.0, 2.0, 2.0)
            .with_hole(Polygon::rectangle(0.0, 0.0, 0.5, 1.0).exterior);
        assert!(is_close!(polygon.intersection_area(&unit_cell()), 0.5));
    }

    #[test]
    fn shape_key_ignores_id() {
        let a = Geometry::new(vec![Polygon::rectangle(0.0, 0.0, 1.0, 1.0)]).with_id("a");
        let b = Geometry::new(vec![Polygon::rectangle(0.0, 0.0, 1.0, 1.0)]).with_id("b");
        let c = Geometry::new(vec![Polygon::rectangle(0.0, 0.0, 1.0, 2.0)]);
        assert_eq!(a.shape_key(), b.shape_key());
        assert_ne!(a.shape_key(), c.shape_key());
    }

    #[test]
    fn deserialise_from_toml() {
        let geometry: Geometry = toml::from_str(
            r#"
            id = "basin"
            crs = "EPSG:4326"

            [[polygons]]
            exterior = [[0.0, 0.0], [10.0, 0.0], [10.0, 5.0], [0.0, 5.0]]
            "#,
        )
        .unwrap();
        assert_eq!(geometry.id.as_deref(), Some("basin"));
        assert!(geometry.crs.is_geographic());
        assert_eq!(geometry.area(), 50.0);
    }
}
