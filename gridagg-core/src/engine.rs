//! Aggregation entry point
//!
//! [`AggregationEngine`] ties the planner, mask resolver, executor and metadata propagation
//! together. It owns its configuration and a handle to a [`WeightCache`], which callers may
//! share between engines.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_core::array::{LabelledArray, LabelledData};
//! use gridagg_core::coordinate::{Coordinate, Dimension};
//! use gridagg_core::engine::AggregationEngine;
//! use gridagg_core::request::AggregationRequest;
//! use ndarray::ArrayD;
//!
//! let data = LabelledArray::new(
//!     ArrayD::from_shape_vec(vec![2, 2], vec![1.0, 2.0, 3.0, f64::NAN]).unwrap(),
//!     vec![
//!         Dimension::new("lat", Coordinate::Float(vec![-45.0, 45.0])),
//!         Dimension::new("lon", Coordinate::Float(vec![90.0, 270.0])),
//!     ],
//! )
//! .unwrap();
//!
//! let engine = AggregationEngine::default();
//! let result = engine
//!     .aggregate(&data, &AggregationRequest::new("mean").over(["lon"]))
//!     .unwrap();
//! assert_eq!(result.values().iter().copied().collect::<Vec<f64>>(), vec![1.5, 3.0]);
//! ```

use crate::array::{LabelledArray, LabelledData};
use crate::cache::WeightCache;
use crate::config::EngineConfig;
use crate::coordinate::{Coordinate, Dimension};
use crate::errors::{AggError, AggResult};
use crate::executor::{apply_masks, Executor};
use crate::geometry::{Geometry, Reproject};
use crate::mask::{MaskMode, MaskResolver, SpatialWeightRaster};
use crate::metadata::ProvenanceRecord;
use crate::plan::{Planner, ReductionPlan};
use crate::request::AggregationRequest;
use log::info;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AggregationEngine {
    config: EngineConfig,
    resolver: MaskResolver,
}

impl AggregationEngine {
    /// Create an engine with its own weight cache sized from `config`
    pub fn new(config: EngineConfig) -> AggResult<Self> {
        config.validate()?;
        let cache = Arc::new(WeightCache::new(config.cache_capacity));
        let resolver = MaskResolver::new(cache, config.weight_tolerance);
        Ok(Self { config, resolver })
    }

    /// Use a shared weight cache
    pub fn with_cache(mut self, cache: Arc<WeightCache>) -> Self {
        self.resolver = MaskResolver::new(cache, self.config.weight_tolerance);
        self
    }

    /// Reproject geometries whose reference system differs from the grid's
    pub fn with_reprojector(mut self, reprojector: Arc<dyn Reproject>) -> Self {
        self.resolver = self.resolver.with_reprojector(reprojector);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<WeightCache> {
        self.resolver.cache()
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(&self.config, &self.resolver)
    }

    /// Validate `request` against `data` without reading any values
    pub fn plan<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        request: &AggregationRequest,
    ) -> AggResult<ReductionPlan> {
        self.planner().plan(data, request)
    }

    pub fn execute<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        plan: &ReductionPlan,
    ) -> AggResult<LabelledArray> {
        Executor::new(&self.config).execute(data, plan)
    }

    /// Plan and execute `request`, returning a new array
    pub fn aggregate<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        request: &AggregationRequest,
    ) -> AggResult<LabelledArray> {
        let plan = self.plan(data, request)?;
        self.execute(data, &plan)
    }

    /// Weight raster of `geometry` on the grid of `data`
    pub fn weight_raster<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        geometry: &Geometry,
        mode: MaskMode,
    ) -> AggResult<Arc<SpatialWeightRaster>> {
        let planner = self.planner();
        let grid = planner.grid(data)?;
        let geometry = planner.check_geometry(geometry, &grid)?;
        self.resolver.resolve(&geometry, &grid, mode)
    }

    /// Apply each geometry as a mask without reducing
    ///
    /// The result has a leading `mask_dim` dimension labelled by geometry identifiers;
    /// cells outside a geometry are missing.
    pub fn masks<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        geometries: &[Geometry],
        mode: MaskMode,
        mask_dim: &str,
    ) -> AggResult<LabelledArray> {
        if geometries.is_empty() {
            return Err(AggError::InvalidRequest(
                "no geometries to mask with".to_string(),
            ));
        }
        if data.has_dimension(mask_dim) {
            return Err(AggError::InvalidRequest(format!(
                "mask dimension '{mask_dim}' already exists on the input"
            )));
        }
        let planner = self.planner();
        let (lat, lon) = planner.spatial_dims(data)?;
        let grid = planner.grid(data)?;
        let mut checked = Vec::with_capacity(geometries.len());
        for geometry in geometries {
            checked.push(planner.check_geometry(geometry, &grid)?);
        }
        let mut rasters = Vec::with_capacity(checked.len());
        let mut labels = Vec::with_capacity(checked.len());
        for (i, geometry) in checked.iter().enumerate() {
            rasters.push(self.resolver.resolve(geometry, &grid, mode)?);
            labels.push(geometry.label(i));
        }
        info!(
            "Masking {:?} with {} geometr{}",
            data.dimension_names(),
            labels.len(),
            if labels.len() == 1 { "y" } else { "ies" }
        );
        let record = ProvenanceRecord {
            operator: "mask".to_string(),
            mask: Some(labels.clone()),
            policy: "skip".to_string(),
            ..Default::default()
        };
        apply_masks(
            data,
            data.axis_of(&lat)?,
            data.axis_of(&lon)?,
            &rasters,
            Dimension::new(mask_dim, Coordinate::Label(labels)),
            &record,
        )
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        let config = EngineConfig::default();
        let cache = Arc::new(WeightCache::new(config.cache_capacity));
        let resolver = MaskResolver::new(cache, config.weight_tolerance);
        Self { config, resolver }
    }
}
