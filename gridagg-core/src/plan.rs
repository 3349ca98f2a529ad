//! Reduction planning
//!
//! [`Planner::plan`] validates an [`AggregationRequest`] against an array and produces an
//! immutable [`ReductionPlan`]. No data values are read. Validation fails on the first
//! violation, checked in this order:
//!
//! 1. requested dimensions (and the time dimension of a window or grouping) exist
//! 2. the operator is recognised
//! 3. a percentile operator has a parameter within [0, 100]
//! 4. masks and weights are compatible with the array's coordinates
//! 5. the missing-value policy is recognised
//!
//! Only once every check has passed are geometries rasterised (through the cache).
//!
//! All whole-dimension reductions of a plan are evaluated jointly for each output cell, so
//! the order in which reduced dimensions are listed never changes the result.

use crate::array::{LabelledArray, LabelledData};
use crate::config::EngineConfig;
use crate::coordinate::{Coordinate, Dimension};
use crate::errors::{AggError, AggResult};
use crate::geometry::{Geometry, ReferenceSystem};
use crate::grid::SpatialGrid;
use crate::mask::{overlaps_grid, MaskMode, MaskResolver, SpatialWeightRaster};
use crate::metadata::ProvenanceRecord;
use crate::request::{
    AggregationRequest, DropMissing, MaskSource, MissingPolicy, Operator, SpatialWeighting,
};
use crate::temporal::{
    check_time_shift, group_times, resample_windows, rolling_windows, shift_times, Frequency,
    TimeGrouping,
};
use log::debug;
use ndarray::{Array2, ArrayD, Ix2};
use std::fmt;
use std::sync::Arc;

/// Attribute holding the reference system of an array's spatial coordinates
pub const CRS_ATTR: &str = "crs";

/// One logical step of a plan
#[derive(Debug, Clone, PartialEq)]
pub enum ReductionStep {
    /// Spatial masking; `dimension` is the region dimension added to the output, if any
    Mask {
        dimension: Option<String>,
        regions: usize,
        mode: MaskMode,
    },
    /// Remove a dimension entirely
    Collapse { dimension: String },
    /// Replace a time dimension by resampling windows
    Window {
        dimension: String,
        frequency: Frequency,
        windows: usize,
    },
    /// Replace a time dimension by time-of-year groups
    Group {
        dimension: String,
        grouping: TimeGrouping,
        groups: usize,
    },
    /// Moving window along a dimension
    Rolling {
        dimension: String,
        size: usize,
        center: bool,
    },
}

impl fmt::Display for ReductionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReductionStep::Mask {
                dimension,
                regions,
                mode,
            } => write!(
                f,
                "mask({regions} region(s), {mode:?}{})",
                dimension
                    .as_ref()
                    .map(|d| format!(" -> {d}"))
                    .unwrap_or_default()
            ),
            ReductionStep::Collapse { dimension } => write!(f, "collapse({dimension})"),
            ReductionStep::Window {
                dimension,
                frequency,
                windows,
            } => write!(f, "resample({dimension}, {frequency}, {windows} window(s))"),
            ReductionStep::Group {
                dimension,
                grouping,
                groups,
            } => write!(f, "group({dimension} by {grouping}, {groups} group(s))"),
            ReductionStep::Rolling {
                dimension,
                size,
                center,
            } => write!(f, "rolling({dimension}, size={size}, center={center})"),
        }
    }
}

/// Where an output axis comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputAxis {
    /// One entry per mask region
    Region,
    /// Input axis kept as is
    Input(usize),
    /// Input axis replaced by groups of positions
    Grouped(usize),
}

/// Input positions contributing to each entry of a grouped axis
#[derive(Debug, Clone, PartialEq)]
pub struct AxisGrouping {
    pub axis: usize,
    pub dimension: Dimension,
    pub members: Vec<Vec<usize>>,
    /// Minimum number of valid contributors for a non-missing result
    pub min_valid: usize,
    /// Positions of the grouped axis removed from the result when their values are missing
    pub drop_missing: Option<DropMissing>,
}

/// Spatial weights applied per output region
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMasks {
    pub lat_axis: usize,
    pub lon_axis: usize,
    /// Region dimension added to the output; `None` for a single raster mask
    pub dimension: Option<Dimension>,
    pub rasters: Vec<Arc<SpatialWeightRaster>>,
}

/// Validated, immutable description of a reduction
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionPlan {
    operator: Operator,
    policy: MissingPolicy,
    steps: Vec<ReductionStep>,
    input_shape: Vec<usize>,
    collapsed: Vec<usize>,
    grouping: Option<AxisGrouping>,
    regions: Option<RegionMasks>,
    weights: Option<ArrayD<f64>>,
    layout: Vec<OutputAxis>,
    output_dims: Vec<Dimension>,
    method_dims: Vec<String>,
    area_weighted: bool,
    provenance: ProvenanceRecord,
}

impl ReductionPlan {
    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn policy(&self) -> MissingPolicy {
        self.policy
    }

    /// Ordered steps, for inspection and logging
    pub fn steps(&self) -> &[ReductionStep] {
        &self.steps
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Input axes removed from the output
    pub fn collapsed_axes(&self) -> &[usize] {
        &self.collapsed
    }

    pub fn grouping(&self) -> Option<&AxisGrouping> {
        self.grouping.as_ref()
    }

    pub fn regions(&self) -> Option<&RegionMasks> {
        self.regions.as_ref()
    }

    /// Combined explicit and grid weights, with the input's shape
    pub fn weights(&self) -> Option<&ArrayD<f64>> {
        self.weights.as_ref()
    }

    pub fn layout(&self) -> &[OutputAxis] {
        &self.layout
    }

    /// Dimensions of the result
    pub fn output_dims(&self) -> &[Dimension] {
        &self.output_dims
    }

    pub fn output_shape(&self) -> Vec<usize> {
        self.output_dims.iter().map(Dimension::len).collect()
    }

    /// Dimensions named in the `cell_methods` entry of the result
    pub fn method_dims(&self) -> &[String] {
        &self.method_dims
    }

    pub fn area_weighted(&self) -> bool {
        self.area_weighted
    }

    pub fn provenance(&self) -> &ProvenanceRecord {
        &self.provenance
    }
}

/// Builds [`ReductionPlan`]s
pub struct Planner<'a> {
    config: &'a EngineConfig,
    resolver: &'a MaskResolver,
}

enum Temporal {
    Resample(Frequency, f64),
    Group(TimeGrouping, u32),
    Rolling(usize, bool, usize, Option<DropMissing>),
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a EngineConfig, resolver: &'a MaskResolver) -> Self {
        Self { config, resolver }
    }

    /// Name of the first dimension of `data` matching one of `candidates`
    fn detect<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        candidates: &[String],
    ) -> AggResult<String> {
        data.find_dimension(candidates)
            .map(String::from)
            .ok_or_else(|| AggError::DimensionNotFound {
                name: candidates.first().cloned().unwrap_or_default(),
                available: data.dimension_names().into_iter().map(String::from).collect(),
            })
    }

    /// Latitude and longitude dimension names of `data`
    pub fn spatial_dims<D: LabelledData + ?Sized>(&self, data: &D) -> AggResult<(String, String)> {
        Ok((
            self.detect(data, &self.config.latitude_names)?,
            self.detect(data, &self.config.longitude_names)?,
        ))
    }

    /// Horizontal grid of `data`
    ///
    /// The reference system is read from the `crs` attribute and defaults to WGS84.
    /// Cell footprints come from [`LabelledData::cell_corners`] when the array supplies them.
    pub fn grid<D: LabelledData + ?Sized>(&self, data: &D) -> AggResult<SpatialGrid> {
        let (lat, lon) = self.spatial_dims(data)?;
        let crs = data
            .text_attribute(CRS_ATTR)
            .map(|s| ReferenceSystem(s.to_string()))
            .unwrap_or_default();
        let grid = SpatialGrid::from_data(data, &lat, &lon, crs)?;
        match data.cell_corners() {
            Some(corners) => grid.with_corners(corners.to_vec()),
            None => Ok(grid),
        }
    }

    /// Check a geometry can be rasterised onto `grid`, returning it in the grid's reference system
    pub fn check_geometry(&self, geometry: &Geometry, grid: &SpatialGrid) -> AggResult<Geometry> {
        let geometry = self.resolver.to_grid_crs(geometry, grid)?;
        geometry.validate()?;
        if !overlaps_grid(&geometry, grid) {
            return Err(AggError::IncompatibleCoordinates(format!(
                "geometry {} does not overlap the grid extent",
                geometry.label(0)
            )));
        }
        Ok(geometry)
    }

    fn time_dim<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        requested: &Option<String>,
    ) -> AggResult<String> {
        match requested {
            Some(name) => data.axis_of(name).map(|_| name.clone()),
            None => self.detect(data, &self.config.time_names),
        }
    }

    /// Validate `request` against `data` and build a plan
    pub fn plan<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        request: &AggregationRequest,
    ) -> AggResult<ReductionPlan> {
        // (1) dimensions
        let mut collapsed = Vec::new();
        for name in &request.dims {
            let axis = data.axis_of(name)?;
            if !collapsed.contains(&axis) {
                collapsed.push(axis);
            }
        }

        let temporal_requests = [
            request.resample.is_some(),
            request.group_by.is_some(),
            request.rolling.is_some(),
        ];
        if temporal_requests.iter().filter(|r| **r).count() > 1 {
            return Err(AggError::InvalidRequest(
                "only one of resample, group_by and rolling may be given".to_string(),
            ));
        }
        let temporal = if let Some(spec) = &request.resample {
            let dim = self.time_dim(data, &spec.dim)?;
            let frequency: Frequency = spec.frequency.parse()?;
            check_time_shift(spec.time_shift_hours)?;
            Some((dim, Temporal::Resample(frequency, spec.time_shift_hours)))
        } else if let Some(spec) = &request.group_by {
            let dim = self.time_dim(data, &spec.dim)?;
            if spec.bin_width == 0 {
                return Err(AggError::InvalidWindow("bin width must be positive".to_string()));
            }
            Some((dim, Temporal::Group(spec.grouping, spec.bin_width)))
        } else if let Some(spec) = &request.rolling {
            data.axis_of(&spec.dim)?;
            if spec.size == 0 {
                return Err(AggError::InvalidWindow(
                    "rolling window size must be positive".to_string(),
                ));
            }
            let min_periods = spec.min_periods.unwrap_or(spec.size).clamp(1, spec.size);
            Some((
                spec.dim.clone(),
                Temporal::Rolling(spec.size, spec.center, min_periods, spec.drop_missing),
            ))
        } else {
            None
        };
        if let Some((dim, _)) = &temporal {
            let axis = data.axis_of(dim)?;
            if collapsed.contains(&axis) {
                return Err(AggError::InvalidRequest(format!(
                    "dimension '{dim}' cannot be both collapsed and windowed"
                )));
            }
        }

        let needs_grid = request.mask.is_some() || request.spatial_weights.is_some();
        let spatial = if needs_grid {
            let (lat, lon) = self.spatial_dims(data)?;
            Some((lat, lon))
        } else {
            None
        };

        // (2, 3) operator and percentile parameter
        let operator = Operator::parse(&request.operator, request.percentile)?;

        // (4) mask and weight compatibility
        let grid = if request.spatial_weights.is_some()
            || matches!(request.mask, Some(MaskSource::Geometries(_)))
        {
            Some(self.grid(data)?)
        } else {
            None
        };
        let mut geometries = Vec::new();
        if let (Some(MaskSource::Geometries(requested)), Some(grid)) = (&request.mask, &grid) {
            if requested.is_empty() {
                return Err(AggError::InvalidRequest(
                    "mask contains no geometries".to_string(),
                ));
            }
            for geometry in requested {
                geometries.push(self.check_geometry(geometry, grid)?);
            }
        }
        let mut raster_mask = None;
        if let (Some(MaskSource::Raster(raster)), Some((lat, lon))) = (&request.mask, &spatial) {
            raster_mask = Some(self.raster_weights(data, raster, lat, lon)?);
        }
        let explicit_weights = match &request.weights {
            Some(weights) => Some(self.explicit_weights(data, weights)?),
            None => None,
        };

        // (5) missing-value policy
        let policy: MissingPolicy = request.policy.parse()?;

        // Validation complete; build the plan
        let ndim = data.ndim();
        let mut steps = Vec::new();
        let mut regions = None;
        let mut mask_labels = None;
        if let Some((lat, lon)) = &spatial {
            let lat_axis = data.axis_of(lat)?;
            let lon_axis = data.axis_of(lon)?;
            if let Some(raster) = raster_mask {
                regions = Some(RegionMasks {
                    lat_axis,
                    lon_axis,
                    dimension: None,
                    rasters: vec![Arc::new(raster)],
                });
                mask_labels = Some(vec!["raster".to_string()]);
                steps.push(ReductionStep::Mask {
                    dimension: None,
                    regions: 1,
                    mode: MaskMode::Fractional,
                });
            } else if let Some(grid) = &grid {
                if !geometries.is_empty() {
                    let mut rasters = Vec::with_capacity(geometries.len());
                    let mut labels = Vec::with_capacity(geometries.len());
                    for (i, geometry) in geometries.iter().enumerate() {
                        rasters.push(self.resolver.resolve(geometry, grid, request.mask_mode)?);
                        labels.push(geometry.label(i));
                    }
                    if data.has_dimension(&request.mask_dim) {
                        return Err(AggError::InvalidRequest(format!(
                            "mask dimension '{}' already exists on the input",
                            request.mask_dim
                        )));
                    }
                    regions = Some(RegionMasks {
                        lat_axis,
                        lon_axis,
                        dimension: Some(Dimension::new(
                            request.mask_dim.clone(),
                            Coordinate::Label(labels.clone()),
                        )),
                        rasters,
                    });
                    mask_labels = Some(labels);
                    steps.push(ReductionStep::Mask {
                        dimension: Some(request.mask_dim.clone()),
                        regions: geometries.len(),
                        mode: request.mask_mode,
                    });
                }
            }
            if regions.is_some() {
                for axis in [lat_axis, lon_axis] {
                    if !collapsed.contains(&axis) {
                        collapsed.push(axis);
                    }
                }
            }
        }

        if collapsed.is_empty() && temporal.is_none() && regions.is_none() {
            collapsed = (0..ndim).collect();
        }
        collapsed.sort_unstable();
        for axis in &collapsed {
            steps.push(ReductionStep::Collapse {
                dimension: data.dimensions()[*axis].name.clone(),
            });
        }

        let mut window = None;
        let mut grouping_name = None;
        let grouping = match temporal {
            Some((dim, kind)) => {
                let axis = data.axis_of(&dim)?;
                let coordinate = &data.dimensions()[axis].coordinate;
                let times = || {
                    coordinate.as_times().ok_or_else(|| {
                        AggError::InvalidWindow(format!(
                            "dimension '{dim}' holds {} coordinates, not times",
                            coordinate.kind()
                        ))
                    })
                };
                Some(match kind {
                    Temporal::Resample(frequency, shift) => {
                        let shifted = shift_times(times()?, shift)?;
                        let windows = resample_windows(&shifted, frequency)?;
                        steps.push(ReductionStep::Window {
                            dimension: dim.clone(),
                            frequency,
                            windows: windows.starts.len(),
                        });
                        window = Some(if shift != 0.0 {
                            format!("{frequency} (shifted {shift}h)")
                        } else {
                            frequency.to_string()
                        });
                        AxisGrouping {
                            axis,
                            dimension: Dimension::new(dim, Coordinate::Time(windows.starts)),
                            members: windows.members,
                            min_valid: 1,
                            drop_missing: None,
                        }
                    }
                    Temporal::Group(kind, bin_width) => {
                        let groups = group_times(times()?, kind, bin_width);
                        let name = kind.name().to_string();
                        if name != dim && data.has_dimension(&name) {
                            return Err(AggError::InvalidRequest(format!(
                                "grouped dimension '{name}' already exists on the input"
                            )));
                        }
                        steps.push(ReductionStep::Group {
                            dimension: dim.clone(),
                            grouping: kind,
                            groups: groups.members.len(),
                        });
                        grouping_name = Some(if bin_width > 1 {
                            format!("{kind} (bin width {bin_width})")
                        } else {
                            kind.to_string()
                        });
                        AxisGrouping {
                            axis,
                            dimension: Dimension::new(name, groups.coordinate),
                            members: groups.members,
                            min_valid: 1,
                            drop_missing: None,
                        }
                    }
                    Temporal::Rolling(size, center, min_periods, drop_missing) => {
                        steps.push(ReductionStep::Rolling {
                            dimension: dim.clone(),
                            size,
                            center,
                        });
                        window = Some(match drop_missing {
                            Some(how) => format!(
                                "rolling(size={size}, center={center}, min_periods={min_periods}, drop={how:?})"
                            ),
                            None => format!(
                                "rolling(size={size}, center={center}, min_periods={min_periods})"
                            ),
                        });
                        AxisGrouping {
                            axis,
                            dimension: data.dimensions()[axis].clone(),
                            members: rolling_windows(coordinate.len(), size, center),
                            min_valid: min_periods,
                            drop_missing,
                        }
                    }
                })
            }
            None => None,
        };

        let weights = self.combine_weights(
            data,
            explicit_weights,
            request.spatial_weights,
            spatial.as_ref(),
            grid.as_ref(),
        )?;

        let mut layout = Vec::new();
        let mut output_dims = Vec::new();
        if let Some(dimension) = regions.as_ref().and_then(|r| r.dimension.clone()) {
            layout.push(OutputAxis::Region);
            output_dims.push(dimension);
        }
        for (axis, dim) in data.dimensions().iter().enumerate() {
            if collapsed.contains(&axis) {
                continue;
            }
            match &grouping {
                Some(g) if g.axis == axis => {
                    layout.push(OutputAxis::Grouped(axis));
                    output_dims.push(g.dimension.clone());
                }
                _ => {
                    layout.push(OutputAxis::Input(axis));
                    output_dims.push(dim.clone());
                }
            }
        }

        let collapsed_names: Vec<String> = collapsed
            .iter()
            .map(|a| data.dimensions()[*a].name.clone())
            .collect();
        let mut method_dims = collapsed_names.clone();
        if let Some(g) = &grouping {
            method_dims.push(data.dimensions()[g.axis].name.clone());
        }
        let area_weighted = request.spatial_weights.is_some()
            || (regions.is_some() && request.mask_mode == MaskMode::Fractional);

        let provenance = ProvenanceRecord {
            operator: operator.name().to_string(),
            parameter: operator.parameter(),
            dims: collapsed_names,
            window,
            grouping: grouping_name,
            mask: mask_labels,
            policy: policy.name().to_string(),
        };

        let plan = ReductionPlan {
            operator,
            policy,
            steps,
            input_shape: data.shape(),
            collapsed,
            grouping,
            regions,
            weights,
            layout,
            output_dims,
            method_dims,
            area_weighted,
            provenance,
        };
        debug!(
            "Planned {} with policy {}: [{}] -> output dims {:?}",
            plan.operator,
            plan.policy,
            plan.steps
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            plan.output_dims
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
        );
        Ok(plan)
    }

    /// Mask raster aligned to `(lat, lon)`
    fn raster_weights<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        raster: &LabelledArray,
        lat: &str,
        lon: &str,
    ) -> AggResult<SpatialWeightRaster> {
        let mut names = raster.dimension_names();
        names.sort_unstable();
        let mut expected = vec![lat, lon];
        expected.sort_unstable();
        if names != expected {
            return Err(AggError::IncompatibleCoordinates(format!(
                "mask raster must have dimensions ({lat}, {lon}), got {:?}",
                raster.dimension_names()
            )));
        }
        let template = LabelledArray::new(
            ArrayD::zeros(vec![data.get_dimension(lat)?.len(), data.get_dimension(lon)?.len()]),
            vec![
                Dimension::new(lat, data.get_dimension(lat)?.clone()),
                Dimension::new(lon, data.get_dimension(lon)?.clone()),
            ],
        )?;
        let missing = raster.missing_value();
        let weights = raster
            .broadcast_to(&template)?
            .mapv(|w| if missing.is_missing(w) { 0.0 } else { w })
            .into_dimensionality::<Ix2>()
            .map_err(|e| AggError::ShapeMismatch(e.to_string()))?;
        SpatialWeightRaster::new(weights, raster.text_attribute("id").map(String::from))
    }

    /// Explicit weights broadcast onto the input layout
    fn explicit_weights<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        weights: &LabelledArray,
    ) -> AggResult<ArrayD<f64>> {
        for name in weights.dimension_names() {
            if !data.has_dimension(name) {
                return Err(AggError::IncompatibleCoordinates(format!(
                    "weight dimension '{name}' is not a dimension of the input"
                )));
            }
        }
        let missing = weights.missing_value();
        if let Some(bad) = weights
            .values()
            .iter()
            .find(|w| !missing.is_missing(**w) && **w < 0.0)
        {
            return Err(AggError::InvalidRequest(format!(
                "weights must be non-negative, found {bad}"
            )));
        }
        Ok(weights
            .broadcast_to(data)?
            .mapv(|w| if missing.is_missing(w) { 0.0 } else { w }))
    }

    fn combine_weights<D: LabelledData + ?Sized>(
        &self,
        data: &D,
        explicit: Option<ArrayD<f64>>,
        weighting: Option<SpatialWeighting>,
        spatial: Option<&(String, String)>,
        grid: Option<&SpatialGrid>,
    ) -> AggResult<Option<ArrayD<f64>>> {
        let grid_weights = match (weighting, spatial, grid) {
            (Some(scheme), Some((lat, lon)), Some(grid)) => {
                let (nlat, nlon) = grid.shape();
                // Curvilinear cells take the latitude of their footprint centre
                let cells = Array2::from_shape_fn((nlat, nlon), |(i, j)| match scheme {
                    SpatialWeighting::Latitude => {
                        grid.cell_centre(i, j)[1].to_radians().cos().max(0.0)
                    }
                    SpatialWeighting::CellArea => grid.cell_area(i, j),
                });
                let array = LabelledArray::new(
                    cells.into_dyn(),
                    vec![
                        Dimension::new(lat.clone(), data.get_dimension(lat)?.clone()),
                        Dimension::new(lon.clone(), data.get_dimension(lon)?.clone()),
                    ],
                )?;
                Some(array.broadcast_to(data)?)
            }
            _ => None,
        };
        Ok(match (explicit, grid_weights) {
            (Some(a), Some(b)) => Some((&a * &b).as_standard_layout().into_owned()),
            (a, b) => a.or(b),
        })
    }
}
