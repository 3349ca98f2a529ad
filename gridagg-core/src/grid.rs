//! Horizontal grid description used for rasterising geometries
//!
//! A [`SpatialGrid`] is built from the latitude and longitude coordinates of a labelled
//! array. Rectilinear cells are bounded halfway between neighbouring centres, with the
//! outermost bounds extrapolated by half a step. For geographic grids latitude bounds are
//! clamped to [-90, 90].
//!
//! Curvilinear grids can supply explicit cell corners with [`SpatialGrid::with_corners`].

use crate::array::LabelledData;
use crate::errors::{AggError, AggResult};
use crate::geometry::{BoundingBox, Point, ReferenceSystem};
use serde::{Deserialize, Serialize};

/// Cell corners in counter-clockwise order
pub type CellCorners = [Point; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialGrid {
    lat_dim: String,
    lon_dim: String,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    lat_bounds: Vec<[f64; 2]>,
    lon_bounds: Vec<[f64; 2]>,
    corners: Option<Vec<CellCorners>>,
    crs: ReferenceSystem,
}

fn infer_bounds(dimension: &str, centres: &[f64]) -> AggResult<Vec<[f64; 2]>> {
    if centres.len() < 2 {
        return Err(AggError::IncompatibleCoordinates(format!(
            "dimension '{dimension}' needs at least two coordinate values to infer cell bounds"
        )));
    }
    let n = centres.len();
    let mut edges = Vec::with_capacity(n + 1);
    edges.push(centres[0] - (centres[1] - centres[0]) / 2.0);
    for w in centres.windows(2) {
        edges.push((w[0] + w[1]) / 2.0);
    }
    edges.push(centres[n - 1] + (centres[n - 1] - centres[n - 2]) / 2.0);
    Ok(edges.windows(2).map(|e| [e[0], e[1]]).collect())
}

impl SpatialGrid {
    /// Create a rectilinear grid from 1-D cell centres
    ///
    /// # Errors
    ///
    /// Returns [`AggError::IncompatibleCoordinates`] if either axis has fewer than two
    /// values or is not strictly monotonic.
    pub fn from_centres(
        lat_dim: impl Into<String>,
        latitudes: Vec<f64>,
        lon_dim: impl Into<String>,
        longitudes: Vec<f64>,
        crs: ReferenceSystem,
    ) -> AggResult<Self> {
        let lat_dim = lat_dim.into();
        let lon_dim = lon_dim.into();
        for (name, values) in [(&lat_dim, &latitudes), (&lon_dim, &longitudes)] {
            let increasing = values.windows(2).all(|w| w[1] > w[0]);
            let decreasing = values.windows(2).all(|w| w[1] < w[0]);
            if !(increasing || decreasing) {
                return Err(AggError::IncompatibleCoordinates(format!(
                    "dimension '{name}' is not strictly monotonic"
                )));
            }
        }
        let mut lat_bounds = infer_bounds(&lat_dim, &latitudes)?;
        let lon_bounds = infer_bounds(&lon_dim, &longitudes)?;
        if crs.is_geographic() {
            for b in lat_bounds.iter_mut() {
                b[0] = b[0].clamp(-90.0, 90.0);
                b[1] = b[1].clamp(-90.0, 90.0);
            }
        }
        Ok(Self {
            lat_dim,
            lon_dim,
            latitudes,
            longitudes,
            lat_bounds,
            lon_bounds,
            corners: None,
            crs,
        })
    }

    /// Build the grid from the named latitude and longitude dimensions of `data`
    pub fn from_data<D: LabelledData + ?Sized>(
        data: &D,
        lat_dim: &str,
        lon_dim: &str,
        crs: ReferenceSystem,
    ) -> AggResult<Self> {
        let coordinate = |name: &str| -> AggResult<Vec<f64>> {
            let coordinate = data.get_dimension(name)?;
            coordinate.as_floats().map(<[f64]>::to_vec).ok_or_else(|| {
                AggError::IncompatibleCoordinates(format!(
                    "spatial dimension '{name}' holds {} coordinates",
                    coordinate.kind()
                ))
            })
        };
        Self::from_centres(
            lat_dim,
            coordinate(lat_dim)?,
            lon_dim,
            coordinate(lon_dim)?,
            crs,
        )
    }

    /// Replace rectilinear cell footprints with explicit corners
    ///
    /// `corners` holds one quadrilateral per cell in row-major `(lat, lon)` order.
    /// Corners may be in either orientation.
    pub fn with_corners(mut self, corners: Vec<CellCorners>) -> AggResult<Self> {
        let (nlat, nlon) = self.shape();
        if corners.len() != nlat * nlon {
            return Err(AggError::ShapeMismatch(format!(
                "expected {} cell corner sets for a {nlat}x{nlon} grid, got {}",
                nlat * nlon,
                corners.len()
            )));
        }
        let corners = corners
            .into_iter()
            .map(|mut c| {
                if crate::geometry::ring_area(&c) < 0.0 {
                    c.reverse();
                }
                c
            })
            .collect();
        self.corners = Some(corners);
        Ok(self)
    }

    pub fn lat_dim(&self) -> &str {
        &self.lat_dim
    }

    pub fn lon_dim(&self) -> &str {
        &self.lon_dim
    }

    pub fn crs(&self) -> &ReferenceSystem {
        &self.crs
    }

    pub fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    /// `(n_lat, n_lon)`
    pub fn shape(&self) -> (usize, usize) {
        (self.latitudes.len(), self.longitudes.len())
    }

    /// Cell footprint as a counter-clockwise quadrilateral
    pub fn cell_polygon(&self, i: usize, j: usize) -> CellCorners {
        if let Some(corners) = &self.corners {
            return corners[i * self.longitudes.len() + j];
        }
        let (y0, y1) = ordered(self.lat_bounds[i]);
        let (x0, x1) = ordered(self.lon_bounds[j]);
        [[x0, y0], [x1, y0], [x1, y1], [x0, y1]]
    }

    pub fn cell_centre(&self, i: usize, j: usize) -> Point {
        match &self.corners {
            Some(corners) => {
                let c = corners[i * self.longitudes.len() + j];
                [
                    c.iter().map(|p| p[0]).sum::<f64>() / 4.0,
                    c.iter().map(|p| p[1]).sum::<f64>() / 4.0,
                ]
            }
            None => [self.longitudes[j], self.latitudes[i]],
        }
    }

    /// Planar footprint area in coordinate units
    pub fn planar_area(&self, i: usize, j: usize) -> f64 {
        crate::geometry::ring_area(&self.cell_polygon(i, j)).abs()
    }

    /// Spherical cell area on the unit sphere for geographic grids
    ///
    /// `(sin φ₂ - sin φ₁)·Δλ` for rectilinear cells. Curvilinear cells use the planar
    /// area scaled by the cosine of the centre latitude. Non-geographic grids return the
    /// planar area.
    pub fn cell_area(&self, i: usize, j: usize) -> f64 {
        if !self.crs.is_geographic() {
            return self.planar_area(i, j);
        }
        match &self.corners {
            Some(_) => {
                let centre = self.cell_centre(i, j);
                self.planar_area(i, j).to_radians().to_radians() * centre[1].to_radians().cos()
            }
            None => {
                let (y0, y1) = ordered(self.lat_bounds[i]);
                let (x0, x1) = ordered(self.lon_bounds[j]);
                (y1.to_radians().sin() - y0.to_radians().sin()) * (x1 - x0).to_radians()
            }
        }
    }

    /// Bounding box of cell `(i, j)`
    pub fn cell_bbox(&self, i: usize, j: usize) -> BoundingBox {
        let polygon = self.cell_polygon(i, j);
        // A quadrilateral always has points
        BoundingBox::from_points(&polygon).unwrap_or(BoundingBox {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 0.0,
            max_y: 0.0,
        })
    }

    /// Bounding box of all cell footprints
    pub fn extent(&self) -> BoundingBox {
        let (nlat, nlon) = self.shape();
        let mut extent = self.cell_bbox(0, 0);
        for i in 0..nlat {
            for j in 0..nlon {
                if self.corners.is_some() || i == 0 || j == 0 || i == nlat - 1 || j == nlon - 1 {
                    extent = extent.union(&self.cell_bbox(i, j));
                }
            }
        }
        extent
    }

    /// Exact identity of the grid in the weight cache
    ///
    /// Holds the bit patterns of the cell centres and any explicit corners, so two grids
    /// share a key only when their cells are identical.
    pub fn key(&self) -> Vec<u64> {
        let mut key = Vec::with_capacity(self.latitudes.len() + self.longitudes.len() + 3);
        for values in [&self.latitudes, &self.longitudes] {
            key.push(values.len() as u64);
            key.extend(values.iter().map(|v| v.to_bits()));
        }
        if let Some(corners) = &self.corners {
            key.push(corners.len() as u64);
            key.extend(
                corners
                    .iter()
                    .flatten()
                    .flat_map(|c| [c[0].to_bits(), c[1].to_bits()]),
            );
        }
        key
    }
}

fn ordered(b: [f64; 2]) -> (f64, f64) {
    if b[0] <= b[1] {
        (b[0], b[1])
    } else {
        (b[1], b[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use is_close::is_close;
    use std::f64::consts::PI;

    fn global_grid(step: f64) -> SpatialGrid {
        let nlat = (180.0 / step) as usize;
        let nlon = (360.0 / step) as usize;
        let lats = (0..nlat).map(|i| -90.0 + step / 2.0 + i as f64 * step).collect();
        let lons = (0..nlon).map(|j| step / 2.0 + j as f64 * step).collect();
        SpatialGrid::from_centres("lat", lats, "lon", lons, ReferenceSystem::wgs84()).unwrap()
    }

    #[test]
    fn bounds_are_midpoints() {
        let grid = SpatialGrid::from_centres(
            "lat",
            vec![0.0, 10.0, 20.0],
            "lon",
            vec![0.0, 5.0],
            ReferenceSystem::wgs84(),
        )
        .unwrap();
        assert_eq!(
            grid.cell_polygon(1, 0),
            [[-2.5, 5.0], [2.5, 5.0], [2.5, 15.0], [-2.5, 15.0]]
        );
    }

    #[test]
    fn latitude_bounds_are_clamped() {
        let grid = SpatialGrid::from_centres(
            "lat",
            vec![-80.0, 0.0, 80.0],
            "lon",
            vec![0.0, 180.0],
            ReferenceSystem::wgs84(),
        )
        .unwrap();
        assert_eq!(grid.extent().min_y, -90.0);
        assert_eq!(grid.extent().max_y, 90.0);
    }

    #[test]
    fn sphere_area_sums_to_four_pi() {
        let grid = global_grid(10.0);
        let (nlat, nlon) = grid.shape();
        let total: f64 = (0..nlat)
            .flat_map(|i| (0..nlon).map(move |j| (i, j)))
            .map(|(i, j)| grid.cell_area(i, j))
            .sum();
        assert!(is_close!(total, 4.0 * PI));
    }

    #[test]
    fn descending_latitudes_are_supported() {
        let grid = SpatialGrid::from_centres(
            "lat",
            vec![45.0, -45.0],
            "lon",
            vec![0.0, 180.0],
            ReferenceSystem::wgs84(),
        )
        .unwrap();
        assert_eq!(grid.cell_centre(0, 0), [0.0, 45.0]);
        assert!(grid.cell_area(0, 0) > 0.0);
    }

    #[test]
    fn single_point_axis_is_rejected() {
        let result = SpatialGrid::from_centres(
            "lat",
            vec![0.0],
            "lon",
            vec![0.0, 1.0],
            ReferenceSystem::wgs84(),
        );
        assert!(matches!(result, Err(AggError::IncompatibleCoordinates(_))));
    }

    #[test]
    fn non_monotonic_axis_is_rejected() {
        let result = SpatialGrid::from_centres(
            "lat",
            vec![0.0, 2.0, 1.0],
            "lon",
            vec![0.0, 1.0],
            ReferenceSystem::wgs84(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn corners_replace_bounds() {
        let grid = SpatialGrid::from_centres(
            "y",
            vec![0.0, 1.0],
            "x",
            vec![0.0, 1.0],
            ReferenceSystem("EPSG:3857".to_string()),
        )
        .unwrap();
        let corners: Vec<CellCorners> = (0..4)
            .map(|k| {
                let (x, y) = ((k % 2) as f64, (k / 2) as f64);
                // clockwise on purpose
                [[x, y], [x, y + 2.0], [x + 2.0, y + 2.0], [x + 2.0, y]]
            })
            .collect();
        let key = grid.key();
        let grid = grid.with_corners(corners).unwrap();
        assert_eq!(grid.planar_area(1, 1), 4.0);
        assert_eq!(grid.cell_area(1, 1), 4.0);
        assert_eq!(grid.cell_centre(0, 1), [2.0, 1.0]);
        assert_ne!(grid.key(), key);
    }
}
