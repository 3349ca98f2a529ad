//! Labelled multidimensional arrays
//!
//! The aggregation engine reads its input through the [`LabelledData`] trait, which exposes a
//! fixed set of capabilities: dimension lookup, coordinate lookup, attributes and read-only
//! access to the values. [`LabelledArray`] is the owned implementation used for results and
//! for callers that do not have their own array representation.
//!
//! Missing values are identified by a [`MissingValue`] policy rather than being coerced to zero.
//! NaN is always treated as missing; an additional sentinel (e.g. a `_FillValue` of `-9999`)
//! can be declared per array.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_core::array::{LabelledArray, LabelledData};
//! use gridagg_core::coordinate::{Coordinate, Dimension};
//! use ndarray::ArrayD;
//!
//! let values = ArrayD::from_shape_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! let array = LabelledArray::new(
//!     values,
//!     vec![
//!         Dimension::new("latitude", Coordinate::Float(vec![-45.0, 45.0])),
//!         Dimension::new("longitude", Coordinate::Float(vec![0.0, 120.0, 240.0])),
//!     ],
//! )
//! .unwrap();
//!
//! assert_eq!(array.shape(), vec![2, 3]);
//! let north = array.slice("latitude", 1..2).unwrap();
//! assert_eq!(north.values().sum(), 15.0);
//! ```

use crate::coordinate::{Coordinate, Dimension};
use crate::errors::{AggError, AggResult};
use crate::grid::CellCorners;
use chrono::NaiveDateTime;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Name of the attribute holding the missing-value sentinel (CF convention)
pub const FILL_VALUE_ATTR: &str = "_FillValue";

/// Value of a single attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Numbers(Vec<f64>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => write!(f, "{s}"),
            AttrValue::Number(v) => write!(f, "{v}"),
            AttrValue::Numbers(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Number(value)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(value: Vec<f64>) -> Self {
        AttrValue::Numbers(value)
    }
}

/// Attribute mapping (units, provenance, CF metadata, ...)
///
/// A `BTreeMap` keeps serialisation deterministic.
pub type Attributes = BTreeMap<String, AttrValue>;

/// How missing cells are encoded in an array
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum MissingValue {
    /// Missing cells are NaN
    #[default]
    Nan,
    /// Missing cells hold this sentinel (NaN is also treated as missing)
    Sentinel(f64),
}

impl MissingValue {
    /// Test whether `value` represents a missing cell
    #[inline]
    pub fn is_missing(&self, value: f64) -> bool {
        match self {
            MissingValue::Nan => value.is_nan(),
            MissingValue::Sentinel(s) => value.is_nan() || value == *s,
        }
    }

    /// Value written into output cells that are missing
    #[inline]
    pub fn value(&self) -> f64 {
        match self {
            MissingValue::Nan => f64::NAN,
            MissingValue::Sentinel(s) => *s,
        }
    }
}

/// Read access to a labelled multidimensional array
///
/// Adapters for other array representations implement the four required methods;
/// lookups are provided on top of them.
pub trait LabelledData {
    /// Named dimensions in axis order
    fn dimensions(&self) -> &[Dimension];

    /// Attribute mapping
    fn attributes(&self) -> &Attributes;

    /// Read-only view of the values, with one axis per dimension
    fn values(&self) -> ArrayViewD<'_, f64>;

    /// Encoding of missing cells
    fn missing_value(&self) -> MissingValue;

    /// Dimension names in axis order
    fn dimension_names(&self) -> Vec<&str> {
        self.dimensions().iter().map(|d| d.name.as_str()).collect()
    }

    /// Number of dimensions
    fn ndim(&self) -> usize {
        self.dimensions().len()
    }

    /// Extent along each axis
    fn shape(&self) -> Vec<usize> {
        self.dimensions().iter().map(|d| d.len()).collect()
    }

    /// Axis index of the named dimension
    fn axis_of(&self, name: &str) -> AggResult<usize> {
        self.dimensions()
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| AggError::DimensionNotFound {
                name: name.to_string(),
                available: self
                    .dimension_names()
                    .into_iter()
                    .map(String::from)
                    .collect(),
            })
    }

    /// Coordinate sequence of the named dimension
    fn get_dimension(&self, name: &str) -> AggResult<&Coordinate> {
        let axis = self.axis_of(name)?;
        Ok(&self.dimensions()[axis].coordinate)
    }

    fn has_dimension(&self, name: &str) -> bool {
        self.dimensions().iter().any(|d| d.name == name)
    }

    /// First dimension whose name matches one of `candidates` (case-insensitive)
    fn find_dimension(&self, candidates: &[String]) -> Option<&str> {
        candidates.iter().find_map(|candidate| {
            self.dimensions()
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(candidate))
                .map(|d| d.name.as_str())
        })
    }

    /// Text value of an attribute, if present
    fn text_attribute(&self, name: &str) -> Option<&str> {
        self.attributes().get(name).and_then(AttrValue::as_text)
    }

    /// Footprints of the horizontal cells of a curvilinear grid
    ///
    /// One quadrilateral per cell, row-major over the latitude then the longitude
    /// dimension. `None` means cell bounds are inferred from the 1-D coordinates.
    fn cell_corners(&self) -> Option<&[CellCorners]> {
        None
    }
}

/// Owned n-dimensional array with named, coordinate-valued axes and attributes
///
/// Invariant: the array rank equals the number of dimensions and each coordinate's length
/// equals the extent of the matching axis. All operations return new arrays; an existing
/// array is never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledArray {
    values: ArrayD<f64>,
    dims: Vec<Dimension>,
    #[serde(default)]
    attrs: Attributes,
    #[serde(default)]
    missing: MissingValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    corners: Option<Vec<CellCorners>>,
}

impl LabelledArray {
    /// Create a labelled array without attributes
    ///
    /// # Errors
    ///
    /// Returns [`AggError::ShapeMismatch`] if the rank or an axis extent does not match the
    /// dimensions, and [`AggError::InvalidRequest`] if a dimension name is repeated.
    pub fn new(values: ArrayD<f64>, dims: Vec<Dimension>) -> AggResult<Self> {
        Self::with_attrs(values, dims, Attributes::new())
    }

    /// Create a labelled array with attributes
    ///
    /// A numeric `_FillValue` attribute declares the missing-value sentinel.
    pub fn with_attrs(
        values: ArrayD<f64>,
        dims: Vec<Dimension>,
        attrs: Attributes,
    ) -> AggResult<Self> {
        if values.ndim() != dims.len() {
            return Err(AggError::ShapeMismatch(format!(
                "array has rank {} but {} dimension(s) were given",
                values.ndim(),
                dims.len()
            )));
        }
        for (axis, dim) in dims.iter().enumerate() {
            if values.len_of(Axis(axis)) != dim.len() {
                return Err(AggError::ShapeMismatch(format!(
                    "dimension '{}' has {} coordinate value(s) but axis {} has extent {}",
                    dim.name,
                    dim.len(),
                    axis,
                    values.len_of(Axis(axis))
                )));
            }
            if dims[..axis].iter().any(|d| d.name == dim.name) {
                return Err(AggError::InvalidRequest(format!(
                    "dimension '{}' appears more than once",
                    dim.name
                )));
            }
        }
        let missing = attrs
            .get(FILL_VALUE_ATTR)
            .and_then(AttrValue::as_number)
            .map(MissingValue::Sentinel)
            .unwrap_or_default();
        Ok(Self {
            values,
            dims,
            attrs,
            missing,
            corners: None,
        })
    }

    /// Replace the missing-value encoding
    pub fn with_missing_value(mut self, missing: MissingValue) -> Self {
        self.missing = missing;
        self
    }

    /// Attach explicit cell footprints for a curvilinear grid
    ///
    /// The corners are checked against the grid shape when a mask or area weighting is
    /// planned. They are kept by [`LabelledArray::slice`] and [`LabelledArray::select`];
    /// subsetting a spatial dimension leaves a corner count that no longer matches and is
    /// reported as [`AggError::ShapeMismatch`].
    pub fn with_cell_corners(mut self, corners: Vec<CellCorners>) -> Self {
        self.corners = Some(corners);
        self
    }

    /// Return a copy with `updates` merged into the attributes
    ///
    /// Existing keys are overwritten; the original array is unchanged.
    pub fn with_attributes<I, K, V>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        let mut out = self.clone();
        for (k, v) in updates {
            out.attrs.insert(k.into(), v.into());
        }
        out
    }

    /// Owned values
    pub fn into_values(self) -> ArrayD<f64> {
        self.values
    }

    /// Contiguous sub-array along one dimension
    ///
    /// # Errors
    ///
    /// * [`AggError::DimensionNotFound`] if `dimension` does not exist
    /// * [`AggError::IndexOutOfRange`] if `range` is not within the dimension
    pub fn slice(&self, dimension: &str, range: Range<usize>) -> AggResult<Self> {
        let axis = self.axis_of(dimension)?;
        let len = self.dims[axis].len();
        if range.start > range.end || range.end > len {
            return Err(AggError::IndexOutOfRange {
                dimension: dimension.to_string(),
                index: range.end.max(range.start),
                len,
            });
        }
        let values = self
            .values
            .slice_axis(Axis(axis), Slice::from(range.clone()))
            .to_owned();
        let mut dims = self.dims.clone();
        dims[axis].coordinate = self.dims[axis].coordinate.slice(range);
        Ok(Self {
            values,
            dims,
            attrs: self.attrs.clone(),
            missing: self.missing,
            corners: self.corners.clone(),
        })
    }

    /// Sub-array of the positions listed in `indices` along one dimension
    pub fn select(&self, dimension: &str, indices: &[usize]) -> AggResult<Self> {
        let axis = self.axis_of(dimension)?;
        let len = self.dims[axis].len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(AggError::IndexOutOfRange {
                dimension: dimension.to_string(),
                index: bad,
                len,
            });
        }
        let values = self.values.select(Axis(axis), indices);
        let mut dims = self.dims.clone();
        dims[axis].coordinate = self.dims[axis].coordinate.select(indices);
        Ok(Self {
            values,
            dims,
            attrs: self.attrs.clone(),
            missing: self.missing,
            corners: self.corners.clone(),
        })
    }

    /// Positions along a time dimension with `start <= t < end`
    ///
    /// Either bound may be omitted.
    pub fn select_time(
        &self,
        dimension: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> AggResult<Self> {
        let coordinate = self.get_dimension(dimension)?;
        let times = coordinate.as_times().ok_or_else(|| {
            AggError::InvalidRequest(format!(
                "dimension '{dimension}' holds {} coordinates, not times",
                coordinate.kind()
            ))
        })?;
        let indices: Vec<usize> = times
            .iter()
            .enumerate()
            .filter(|(_, t)| start.map_or(true, |s| **t >= s) && end.map_or(true, |e| **t < e))
            .map(|(i, _)| i)
            .collect();
        self.select(dimension, &indices)
    }

    /// Stack arrays with identical dimensions along a new leading dimension
    ///
    /// Attributes and the missing-value encoding are taken from the first array.
    ///
    /// # Errors
    ///
    /// * [`AggError::ShapeMismatch`] if `arrays` is empty or its length differs from the
    ///   new dimension's length
    /// * [`AggError::IncompatibleCoordinates`] if the arrays do not share coordinates
    pub fn stack(arrays: &[LabelledArray], dimension: Dimension) -> AggResult<Self> {
        let Some(first) = arrays.first() else {
            return Err(AggError::ShapeMismatch("cannot stack zero arrays".to_string()));
        };
        if arrays.len() != dimension.len() {
            return Err(AggError::ShapeMismatch(format!(
                "stacking {} array(s) along '{}' of length {}",
                arrays.len(),
                dimension.name,
                dimension.len()
            )));
        }
        for other in &arrays[1..] {
            if other.dimension_names() != first.dimension_names() {
                return Err(AggError::IncompatibleCoordinates(format!(
                    "cannot stack arrays with dimensions {:?} and {:?}",
                    first.dimension_names(),
                    other.dimension_names()
                )));
            }
            first.check_compatible(other)?;
        }
        let views: Vec<_> = arrays.iter().map(|a| a.values.view()).collect();
        let values = ndarray::stack(Axis(0), &views)
            .map_err(|e| AggError::ShapeMismatch(e.to_string()))?;
        let mut dims = Vec::with_capacity(first.dims.len() + 1);
        dims.push(dimension);
        dims.extend(first.dims.iter().cloned());
        let mut out = Self::with_attrs(values, dims, first.attrs.clone())?;
        out.corners = first.corners.clone();
        Ok(out.with_missing_value(first.missing))
    }

    /// Check that shared dimensions of two arrays carry identical coordinates
    ///
    /// Dimensions present in only one of the arrays are ignored; use this before
    /// broadcasting one array against another.
    ///
    /// # Errors
    ///
    /// Returns [`AggError::IncompatibleCoordinates`] on the first shared dimension whose
    /// coordinate values differ.
    pub fn check_compatible<D: LabelledData + ?Sized>(&self, other: &D) -> AggResult<()> {
        for dim in &self.dims {
            if let Some(theirs) = other.dimensions().iter().find(|d| d.name == dim.name) {
                dim.coordinate.matches(&theirs.coordinate).map_err(|reason| {
                    AggError::IncompatibleCoordinates(format!(
                        "dimension '{}': {}",
                        dim.name, reason
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Broadcast the values onto the dimension layout of `target`
    ///
    /// Every dimension of `self` must exist on `target` with matching coordinates.
    /// Missing axes are inserted and repeated.
    pub fn broadcast_to<D: LabelledData + ?Sized>(&self, target: &D) -> AggResult<ArrayD<f64>> {
        self.check_compatible(target)?;
        let mut target_axes = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            target_axes.push(target.axis_of(&dim.name)?);
        }

        let mut order: Vec<usize> = (0..self.dims.len()).collect();
        order.sort_by_key(|&i| target_axes[i]);
        let present: Vec<usize> = order.iter().map(|&i| target_axes[i]).collect();

        let mut view = self.values.view().permuted_axes(order);
        for axis in 0..target.ndim() {
            if !present.contains(&axis) {
                view = view.insert_axis(Axis(axis));
            }
        }
        let shape = target.shape();
        view.broadcast(IxDyn(&shape))
            .map(|v| v.as_standard_layout().into_owned())
            .ok_or_else(|| {
                AggError::ShapeMismatch(format!(
                    "cannot broadcast {:?} onto {:?}",
                    self.shape(),
                    shape
                ))
            })
    }
}

impl LabelledData for LabelledArray {
    fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    fn values(&self) -> ArrayViewD<'_, f64> {
        self.values.view()
    }

    fn missing_value(&self) -> MissingValue {
        self.missing
    }

    fn cell_corners(&self) -> Option<&[CellCorners]> {
        self.corners.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn grid_array() -> LabelledArray {
        let values = ArrayD::from_shape_vec(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        LabelledArray::new(
            values,
            vec![
                Dimension::new("lat", Coordinate::Float(vec![-45.0, 45.0])),
                Dimension::new("lon", Coordinate::Float(vec![0.0, 120.0, 240.0])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn rank_must_match_dimensions() {
        let values = ArrayD::zeros(vec![2, 3]);
        let result = LabelledArray::new(
            values,
            vec![Dimension::new("lat", Coordinate::index(2))],
        );
        assert!(matches!(result, Err(AggError::ShapeMismatch(_))));
    }

    #[test]
    fn extent_must_match_coordinate_length() {
        let values = ArrayD::zeros(vec![2, 3]);
        let result = LabelledArray::new(
            values,
            vec![
                Dimension::new("lat", Coordinate::index(2)),
                Dimension::new("lon", Coordinate::index(4)),
            ],
        );
        assert!(matches!(result, Err(AggError::ShapeMismatch(_))));
    }

    #[test]
    fn duplicate_dimension_names_rejected() {
        let values = ArrayD::zeros(vec![2, 2]);
        let result = LabelledArray::new(
            values,
            vec![
                Dimension::new("lat", Coordinate::index(2)),
                Dimension::new("lat", Coordinate::index(2)),
            ],
        );
        assert!(matches!(result, Err(AggError::InvalidRequest(_))));
    }

    #[test]
    fn get_dimension_reports_missing_name() {
        let array = grid_array();
        assert_eq!(array.get_dimension("lon").unwrap().len(), 3);
        match array.get_dimension("time") {
            Err(AggError::DimensionNotFound { name, available }) => {
                assert_eq!(name, "time");
                assert_eq!(available, vec!["lat", "lon"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn slice_is_bounds_checked() {
        let array = grid_array();
        let sliced = array.slice("lon", 1..3).unwrap();
        assert_eq!(sliced.shape(), vec![2, 2]);
        assert_eq!(
            sliced.get_dimension("lon").unwrap(),
            &Coordinate::Float(vec![120.0, 240.0])
        );
        assert_eq!(sliced.values()[[1, 0]], 5.0);

        assert!(matches!(
            array.slice("lon", 2..4),
            Err(AggError::IndexOutOfRange { len: 3, .. })
        ));
        assert!(matches!(
            array.slice("depth", 0..1),
            Err(AggError::DimensionNotFound { .. })
        ));
    }

    #[test]
    fn with_attributes_does_not_mutate_input() {
        let array = grid_array();
        let updated = array.with_attributes([("units", "K")]);
        assert!(array.attributes().is_empty());
        assert_eq!(updated.text_attribute("units"), Some("K"));
    }

    #[test]
    fn fill_value_attribute_sets_sentinel() {
        let mut attrs = Attributes::new();
        attrs.insert(FILL_VALUE_ATTR.to_string(), AttrValue::Number(-9999.0));
        let array = LabelledArray::with_attrs(
            ArrayD::from_elem(vec![1], -9999.0),
            vec![Dimension::new("x", Coordinate::index(1))],
            attrs,
        )
        .unwrap();
        assert_eq!(array.missing_value(), MissingValue::Sentinel(-9999.0));
        assert!(array.missing_value().is_missing(-9999.0));
        assert!(array.missing_value().is_missing(f64::NAN));
        assert!(!array.missing_value().is_missing(0.0));
    }

    #[test]
    fn compatibility_compares_values_not_only_shapes() {
        let a = grid_array();
        let shifted = LabelledArray::new(
            ArrayD::zeros(vec![3]),
            vec![Dimension::new(
                "lon",
                Coordinate::Float(vec![0.0, 120.0, 241.0]),
            )],
        )
        .unwrap();
        assert!(matches!(
            shifted.check_compatible(&a),
            Err(AggError::IncompatibleCoordinates(_))
        ));
    }

    #[test]
    fn broadcast_inserts_missing_axes() {
        let target = grid_array();
        let weights = LabelledArray::new(
            ArrayD::from_shape_vec(vec![2], vec![0.25, 0.75]).unwrap(),
            vec![Dimension::new("lat", Coordinate::Float(vec![-45.0, 45.0]))],
        )
        .unwrap();
        let broadcast = weights.broadcast_to(&target).unwrap();
        assert_eq!(broadcast.shape(), &[2, 3]);
        assert_eq!(broadcast[[0, 2]], 0.25);
        assert_eq!(broadcast[[1, 1]], 0.75);
    }

    #[test]
    fn broadcast_reorders_axes() {
        let target = grid_array();
        let transposed = LabelledArray::new(
            ArrayD::from_shape_vec(vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            vec![
                Dimension::new("lon", Coordinate::Float(vec![0.0, 120.0, 240.0])),
                Dimension::new("lat", Coordinate::Float(vec![-45.0, 45.0])),
            ],
        )
        .unwrap();
        let broadcast = transposed.broadcast_to(&target).unwrap();
        assert_eq!(broadcast.shape(), &[2, 3]);
        assert_eq!(broadcast[[1, 0]], 2.0);
        assert_eq!(broadcast[[0, 2]], 5.0);
    }

    #[test]
    fn stack_adds_leading_dimension() {
        let a = grid_array();
        let b = grid_array().with_attributes([("units", "K")]);
        let stacked = LabelledArray::stack(
            &[a.clone(), b],
            Dimension::new("member", Coordinate::Label(vec!["a".into(), "b".into()])),
        )
        .unwrap();
        assert_eq!(stacked.dimension_names(), vec!["member", "lat", "lon"]);
        assert_eq!(stacked.shape(), vec![2, 2, 3]);
        assert!(stacked.attributes().is_empty());

        let wrong_length = LabelledArray::stack(&[a], Dimension::new("member", Coordinate::index(2)));
        assert!(matches!(wrong_length, Err(AggError::ShapeMismatch(_))));
    }

    #[test]
    fn select_time_range() {
        let times: Vec<NaiveDateTime> = (1..=4)
            .map(|m| {
                NaiveDate::from_ymd_opt(2001, m, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            })
            .collect();
        let array = LabelledArray::new(
            ArrayD::from_shape_vec(vec![4], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            vec![Dimension::new("time", Coordinate::Time(times.clone()))],
        )
        .unwrap();
        let selected = array
            .select_time("time", Some(times[1]), Some(times[3]))
            .unwrap();
        assert_eq!(selected.values().iter().copied().collect::<Vec<f64>>(), vec![2.0, 3.0]);
    }
}
