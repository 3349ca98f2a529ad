//! Aggregation requests
//!
//! An [`AggregationRequest`] names an operator, the dimensions to reduce (or a temporal
//! window, time-of-year grouping or rolling window), an optional spatial mask, optional
//! weights and a missing-value policy. Requests are plain data: operator and policy are
//! carried by name and validated by the [planner](crate::plan) so that requests can be
//! stored in TOML documents.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_core::request::AggregationRequest;
//!
//! let request = AggregationRequest::from_toml_str(
//!     r#"
//!     operator = "mean"
//!     policy = "skip"
//!
//!     [resample]
//!     dim = "time"
//!     frequency = "M"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(request.operator, "mean");
//! assert_eq!(request.resample.unwrap().frequency, "M");
//! ```

use crate::array::LabelledArray;
use crate::errors::{AggError, AggResult};
use crate::geometry::Geometry;
use crate::mask::MaskMode;
use crate::temporal::TimeGrouping;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reduction operator
///
/// A closed set: every operator is handled explicitly by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Weighted mean
    ///
    /// $$ \bar{x} = \frac{\sum_i w_i x_i}{\sum_i w_i} $$
    Mean,
    /// Weighted sum
    ///
    /// $$ \sum_i w_i x_i $$
    Sum,
    /// Minimum (weights only exclude cells)
    Min,
    /// Maximum (weights only exclude cells)
    Max,
    /// Weighted population standard deviation
    ///
    /// $$ \sigma = \sqrt{\frac{\sum_i w_i (x_i - \bar{x})^2}{\sum_i w_i}} $$
    Std,
    /// Number of valid contributing cells
    Count,
    /// Weighted median
    Median,
    /// Weighted percentile with parameter in [0, 100]
    Percentile(f64),
}

impl Operator {
    /// Resolve an operator name and optional parameter
    ///
    /// Accepts the aliases `average`, `stdev`/`stddev`, `p` and `q`/`quantile`
    /// (the latter taking a parameter in [0, 1]).
    ///
    /// # Errors
    ///
    /// * [`AggError::UnsupportedOperator`] if the name is not recognised
    /// * [`AggError::InvalidPercentile`] if a percentile parameter is missing or outside [0, 100]
    pub fn parse(name: &str, parameter: Option<f64>) -> AggResult<Self> {
        let percentile = |scale: f64| -> AggResult<Operator> {
            let p = parameter.ok_or(AggError::InvalidPercentile(f64::NAN))? * scale;
            if !(0.0..=100.0).contains(&p) {
                return Err(AggError::InvalidPercentile(p));
            }
            Ok(Operator::Percentile(p))
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "mean" | "average" => Ok(Operator::Mean),
            "sum" => Ok(Operator::Sum),
            "min" | "minimum" => Ok(Operator::Min),
            "max" | "maximum" => Ok(Operator::Max),
            "std" | "stdev" | "stddev" => Ok(Operator::Std),
            "count" => Ok(Operator::Count),
            "median" => Ok(Operator::Median),
            "percentile" | "p" => percentile(1.0),
            "quantile" | "q" => percentile(100.0),
            _ => Err(AggError::UnsupportedOperator(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Mean => "mean",
            Operator::Sum => "sum",
            Operator::Min => "min",
            Operator::Max => "max",
            Operator::Std => "std",
            Operator::Count => "count",
            Operator::Median => "median",
            Operator::Percentile(_) => "percentile",
        }
    }

    pub fn parameter(&self) -> Option<f64> {
        match self {
            Operator::Percentile(p) => Some(*p),
            _ => None,
        }
    }

    /// Method name used in the CF `cell_methods` attribute
    pub fn cell_method(&self) -> String {
        match self {
            Operator::Mean => "mean".to_string(),
            Operator::Sum => "sum".to_string(),
            Operator::Min => "minimum".to_string(),
            Operator::Max => "maximum".to_string(),
            Operator::Std => "standard_deviation".to_string(),
            Operator::Count => "count".to_string(),
            Operator::Median => "median".to_string(),
            Operator::Percentile(p) => format!("percentile (p={p})"),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Percentile(p) => write!(f, "percentile({p})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// How missing input cells affect a reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingPolicy {
    /// Reduce over valid cells; an output with no valid contributors is missing
    #[default]
    Skip,
    /// Any missing contributor makes the output missing
    Propagate,
    /// Any missing contributor is an error
    RequireComplete,
}

impl MissingPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            MissingPolicy::Skip => "skip",
            MissingPolicy::Propagate => "propagate",
            MissingPolicy::RequireComplete => "require-complete",
        }
    }
}

impl FromStr for MissingPolicy {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "skip" | "skipna" => Ok(MissingPolicy::Skip),
            "propagate" => Ok(MissingPolicy::Propagate),
            "require-complete" => Ok(MissingPolicy::RequireComplete),
            _ => Err(AggError::UnsupportedPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for MissingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-cell weighting derived from the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialWeighting {
    /// cos(latitude)
    Latitude,
    /// Spherical cell area
    CellArea,
}

/// Calendar or fixed-duration resampling along a time dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleSpec {
    #[serde(default)]
    pub dim: Option<String>,
    /// Frequency such as `"D"`, `"M"`, `"6H"` or `"every 12 months"`
    pub frequency: String,
    /// Hours added to every timestamp before window assignment
    #[serde(default)]
    pub time_shift_hours: f64,
}

/// Grouping by time of year (e.g. all Januaries together)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBySpec {
    #[serde(default)]
    pub dim: Option<String>,
    pub grouping: TimeGrouping,
    #[serde(default = "default_bin_width")]
    pub bin_width: u32,
}

fn default_bin_width() -> u32 {
    1
}

/// Moving window along any dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingSpec {
    pub dim: String,
    pub size: usize,
    #[serde(default)]
    pub center: bool,
    /// Minimum number of valid cells in a window; defaults to `size`
    #[serde(default)]
    pub min_periods: Option<usize>,
    /// Remove positions along `dim` whose results are missing
    #[serde(default)]
    pub drop_missing: Option<DropMissing>,
}

/// Which positions of a rolling result are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropMissing {
    /// Positions where any output cell is missing
    Any,
    /// Positions where every output cell is missing
    All,
}

/// Spatial mask supplied with a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskSource {
    /// One output region per geometry
    Geometries(Vec<Geometry>),
    /// Precomputed weights in [0, 1] over the latitude/longitude dimensions
    Raster(LabelledArray),
}

fn default_policy() -> String {
    MissingPolicy::default().name().to_string()
}

fn default_mask_dim() -> String {
    "region".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub operator: String,
    /// Parameter of the `percentile` (0-100) or `quantile` (0-1) operators
    #[serde(default)]
    pub percentile: Option<f64>,
    /// Dimensions reduced entirely
    #[serde(default)]
    pub dims: Vec<String>,
    #[serde(default)]
    pub resample: Option<ResampleSpec>,
    #[serde(default)]
    pub group_by: Option<GroupBySpec>,
    #[serde(default)]
    pub rolling: Option<RollingSpec>,
    #[serde(default)]
    pub mask: Option<MaskSource>,
    #[serde(default)]
    pub mask_mode: MaskMode,
    /// Name of the dimension enumerating geometries
    #[serde(default = "default_mask_dim")]
    pub mask_dim: String,
    /// Explicit weights over a subset of the input's dimensions
    #[serde(default)]
    pub weights: Option<LabelledArray>,
    #[serde(default)]
    pub spatial_weights: Option<SpatialWeighting>,
    #[serde(default = "default_policy")]
    pub policy: String,
}

impl AggregationRequest {
    /// Request applying `operator` with default settings
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            percentile: None,
            dims: vec![],
            resample: None,
            group_by: None,
            rolling: None,
            mask: None,
            mask_mode: MaskMode::default(),
            mask_dim: default_mask_dim(),
            weights: None,
            spatial_weights: None,
            policy: default_policy(),
        }
    }

    pub fn from_toml_str(s: &str) -> AggResult<Self> {
        toml::from_str(s).map_err(|e| AggError::InvalidRequest(e.to_string()))
    }

    pub fn to_toml_string(&self) -> AggResult<String> {
        toml::to_string(self).map_err(|e| AggError::InvalidRequest(e.to_string()))
    }

    pub fn over<I, S>(mut self, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dims = dims.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = Some(percentile);
        self
    }

    /// Resample the time dimension (auto-detected) at `frequency`
    pub fn resample(mut self, frequency: impl Into<String>) -> Self {
        self.resample = Some(ResampleSpec {
            dim: None,
            frequency: frequency.into(),
            time_shift_hours: 0.0,
        });
        self
    }

    pub fn with_time_shift(mut self, hours: f64) -> Self {
        if let Some(resample) = self.resample.as_mut() {
            resample.time_shift_hours = hours;
        }
        self
    }

    pub fn group_by(mut self, grouping: TimeGrouping, bin_width: u32) -> Self {
        self.group_by = Some(GroupBySpec {
            dim: None,
            grouping,
            bin_width,
        });
        self
    }

    pub fn rolling(mut self, dim: impl Into<String>, size: usize, center: bool) -> Self {
        self.rolling = Some(RollingSpec {
            dim: dim.into(),
            size,
            center,
            min_periods: None,
            drop_missing: None,
        });
        self
    }

    pub fn with_min_periods(mut self, min_periods: usize) -> Self {
        if let Some(rolling) = self.rolling.as_mut() {
            rolling.min_periods = Some(min_periods);
        }
        self
    }

    pub fn with_drop_missing(mut self, how: DropMissing) -> Self {
        if let Some(rolling) = self.rolling.as_mut() {
            rolling.drop_missing = Some(how);
        }
        self
    }

    pub fn with_geometries(mut self, geometries: Vec<Geometry>) -> Self {
        self.mask = Some(MaskSource::Geometries(geometries));
        self
    }

    pub fn with_mask_raster(mut self, raster: LabelledArray) -> Self {
        self.mask = Some(MaskSource::Raster(raster));
        self
    }

    pub fn with_mask_mode(mut self, mode: MaskMode) -> Self {
        self.mask_mode = mode;
        self
    }

    pub fn with_mask_dim(mut self, name: impl Into<String>) -> Self {
        self.mask_dim = name.into();
        self
    }

    pub fn with_weights(mut self, weights: LabelledArray) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_spatial_weights(mut self, weighting: SpatialWeighting) -> Self {
        self.spatial_weights = Some(weighting);
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }
}
