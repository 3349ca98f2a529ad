//! Spatial mask resolution
//!
//! Converts a [`Geometry`] into a [`SpatialWeightRaster`] aligned with a [`SpatialGrid`].
//!
//! In [`MaskMode::Fractional`] mode each cell holds the fraction of its footprint covered by
//! the geometry, computed by clipping every polygon ring against the (convex) cell footprint
//! with Sutherland-Hodgman and taking shoelace areas. Holes are subtracted. In
//! [`MaskMode::CellCentre`] mode a cell has weight 1 if its centre lies inside the geometry
//! and 0 otherwise.
//!
//! Cells whose bounding box does not intersect the geometry's bounding box are skipped
//! before any exact intersection is computed.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_core::geometry::{Geometry, Polygon, ReferenceSystem};
//! use gridagg_core::grid::SpatialGrid;
//! use gridagg_core::mask::{rasterize, MaskMode};
//!
//! let grid = SpatialGrid::from_centres(
//!     "lat", vec![0.5, 1.5], "lon", vec![0.5, 1.5], ReferenceSystem("local".into()),
//! ).unwrap();
//! let geometry = Geometry::new(vec![Polygon::rectangle(0.0, 0.0, 1.0, 2.0)])
//!     .with_crs(ReferenceSystem("local".into()));
//!
//! let raster = rasterize(&geometry, &grid, MaskMode::Fractional, 1e-9).unwrap();
//! assert_eq!(raster.weights()[[0, 0]], 1.0);
//! assert_eq!(raster.weights()[[1, 1]], 0.0);
//! ```

use crate::cache::{CacheKey, WeightCache};
use crate::errors::{AggError, AggResult};
use crate::geometry::{Geometry, Reproject};
use crate::grid::SpatialGrid;
use log::{debug, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How cell membership is derived from a geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    /// Fraction of the cell area covered by the geometry
    #[default]
    Fractional,
    /// 1 if the cell centre is inside the geometry
    CellCentre,
}

/// Grid-aligned weights in [0, 1] derived from a geometry
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialWeightRaster {
    weights: Array2<f64>,
    label: Option<String>,
    mode: MaskMode,
}

impl SpatialWeightRaster {
    /// Wrap precomputed weights
    ///
    /// # Errors
    ///
    /// Returns [`AggError::InvalidRequest`] if any weight lies outside [0, 1].
    pub fn new(weights: Array2<f64>, label: Option<String>) -> AggResult<Self> {
        if let Some(bad) = weights.iter().find(|w| !(0.0..=1.0).contains(*w)) {
            return Err(AggError::InvalidRequest(format!(
                "mask weights must lie within [0, 1], found {bad}"
            )));
        }
        Ok(Self {
            weights,
            label,
            mode: MaskMode::Fractional,
        })
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn mode(&self) -> MaskMode {
        self.mode
    }

    fn with_label(&self, label: Option<String>) -> Self {
        Self {
            weights: self.weights.clone(),
            label,
            mode: self.mode,
        }
    }

    /// Number of cells with non-zero weight
    pub fn overlapping_cells(&self) -> usize {
        self.weights.iter().filter(|w| **w > 0.0).count()
    }

    /// Area-weighted fraction of the grid covered by the geometry
    ///
    /// `Σ wᵢ·aᵢ / Σ aᵢ` using the grid's cell areas. A geometry covering the whole grid
    /// gives 1 up to rounding of the clipping arithmetic.
    pub fn covered_fraction(&self, grid: &SpatialGrid) -> f64 {
        let mut covered = 0.0;
        let mut total = 0.0;
        for ((i, j), w) in self.weights.indexed_iter() {
            let area = grid.cell_area(i, j);
            covered += w * area;
            total += area;
        }
        if total > 0.0 {
            covered / total
        } else {
            0.0
        }
    }
}

/// Offsets tried to reconcile longitude conventions between geometry and grid
fn longitude_shifts(geometry: &Geometry, grid: &SpatialGrid) -> Vec<f64> {
    let Some(bbox) = geometry.bbox() else {
        return vec![];
    };
    let extent = grid.extent();
    let candidates: &[f64] = if grid.crs().is_geographic() {
        &[0.0, -360.0, 360.0]
    } else {
        &[0.0]
    };
    candidates
        .iter()
        .copied()
        .filter(|dx| bbox.translate_x(*dx).intersects(&extent))
        .collect()
}

/// Whether `geometry` overlaps the grid extent (allowing a longitude wrap)
pub fn overlaps_grid(geometry: &Geometry, grid: &SpatialGrid) -> bool {
    !longitude_shifts(geometry, grid).is_empty()
}

/// Rasterise a validated geometry onto `grid`
///
/// `tolerance` bounds the rounding error accepted before a cell weight above 1 is reported;
/// weights are always clamped to [0, 1].
pub fn rasterize(
    geometry: &Geometry,
    grid: &SpatialGrid,
    mode: MaskMode,
    tolerance: f64,
) -> AggResult<SpatialWeightRaster> {
    geometry.validate()?;
    let (nlat, nlon) = grid.shape();
    let shifted: Vec<Geometry> = longitude_shifts(geometry, grid)
        .into_iter()
        .map(|dx| {
            if dx == 0.0 {
                geometry.clone()
            } else {
                geometry.translate_x(dx)
            }
        })
        .collect();
    let boxes: Vec<_> = shifted
        .iter()
        .map(|g| g.polygons.iter().map(|p| p.bbox()).collect::<Vec<_>>())
        .collect();

    let rows: Vec<Vec<f64>> = (0..nlat)
        .into_par_iter()
        .map(|i| {
            (0..nlon)
                .map(|j| {
                    let cell_box = grid.cell_bbox(i, j);
                    let cell = grid.cell_polygon(i, j);
                    let mut weight = 0.0;
                    for (geom, polygon_boxes) in shifted.iter().zip(&boxes) {
                        for (polygon, bbox) in geom.polygons.iter().zip(polygon_boxes) {
                            if !bbox.is_some_and(|b| b.intersects(&cell_box)) {
                                continue;
                            }
                            weight += match mode {
                                MaskMode::Fractional => {
                                    let area = grid.planar_area(i, j);
                                    if area > 0.0 {
                                        polygon.intersection_area(&cell) / area
                                    } else {
                                        0.0
                                    }
                                }
                                MaskMode::CellCentre => {
                                    if polygon.contains(grid.cell_centre(i, j)) {
                                        1.0
                                    } else {
                                        0.0
                                    }
                                }
                            };
                        }
                    }
                    weight
                })
                .collect()
        })
        .collect();

    let mut excess: f64 = 0.0;
    let mut weights = Array2::zeros((nlat, nlon));
    for (i, row) in rows.into_iter().enumerate() {
        for (j, w) in row.into_iter().enumerate() {
            excess = excess.max(w - 1.0);
            weights[[i, j]] = w.clamp(0.0, 1.0);
        }
    }
    if mode == MaskMode::Fractional && excess > tolerance {
        warn!(
            "Geometry {} covers some cells more than once (excess weight {:.3e}); weights clamped to 1. Are the parts of the multi-polygon overlapping?",
            geometry.label(0),
            excess
        );
    }
    let raster = SpatialWeightRaster {
        weights,
        label: geometry.id.clone(),
        mode,
    };
    debug!(
        "Rasterised geometry {} onto {}x{} grid: {} overlapping cell(s)",
        geometry.label(0),
        nlat,
        nlon,
        raster.overlapping_cells()
    );
    Ok(raster)
}

/// Resolves geometries to weight rasters, reusing cached results
///
/// The cache is owned by the caller and may be shared between resolvers.
#[derive(Clone)]
pub struct MaskResolver {
    cache: Arc<WeightCache>,
    reprojector: Option<Arc<dyn Reproject>>,
    tolerance: f64,
}

impl std::fmt::Debug for MaskResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskResolver")
            .field("cache", &self.cache)
            .field("reprojector", &self.reprojector.is_some())
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl MaskResolver {
    pub fn new(cache: Arc<WeightCache>, tolerance: f64) -> Self {
        Self {
            cache,
            reprojector: None,
            tolerance,
        }
    }

    pub fn with_reprojector(mut self, reprojector: Arc<dyn Reproject>) -> Self {
        self.reprojector = Some(reprojector);
        self
    }

    pub fn cache(&self) -> &Arc<WeightCache> {
        &self.cache
    }

    /// Bring `geometry` into the grid's reference system
    ///
    /// # Errors
    ///
    /// Returns [`AggError::UnsupportedReferenceSystem`] if the reference systems differ and
    /// no reprojector is configured.
    pub fn to_grid_crs(&self, geometry: &Geometry, grid: &SpatialGrid) -> AggResult<Geometry> {
        if &geometry.crs == grid.crs() {
            return Ok(geometry.clone());
        }
        match &self.reprojector {
            Some(reprojector) => reprojector.reproject(geometry, grid.crs()),
            None => Err(AggError::UnsupportedReferenceSystem {
                from: geometry.crs.to_string(),
                to: grid.crs().to_string(),
            }),
        }
    }

    /// Weight raster for `geometry` on `grid`
    ///
    /// Concurrent calls for the same geometry and grid rasterise once.
    pub fn resolve(
        &self,
        geometry: &Geometry,
        grid: &SpatialGrid,
        mode: MaskMode,
    ) -> AggResult<Arc<SpatialWeightRaster>> {
        let geometry = self.to_grid_crs(geometry, grid)?;
        let key = CacheKey::new(&geometry, grid, mode);
        let raster = self
            .cache
            .get_or_compute(key, || rasterize(&geometry, grid, mode, self.tolerance))?;
        // Cached rasters are shared between geometries that differ only by identifier
        if raster.label() != geometry.id.as_deref() {
            return Ok(Arc::new(raster.with_label(geometry.id.clone())));
        }
        Ok(raster)
    }
}
