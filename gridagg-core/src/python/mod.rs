//! Python bindings for the aggregation engine
//!
//! Arrays cross the boundary as numpy arrays plus dimension names and coordinates.
//! Requests and configuration are passed as TOML documents.

use crate::array::{AttrValue, Attributes, LabelledArray, LabelledData};
use crate::coordinate::{Coordinate, Dimension};
use crate::config::EngineConfig;
use crate::engine::AggregationEngine;
use crate::errors::AggError;
use crate::geometry::{Geometry, Polygon, Point, ReferenceSystem};
use crate::grid::CellCorners;
use crate::mask::MaskMode;
use crate::request::AggregationRequest;
use chrono::{NaiveDate, NaiveDateTime};
use numpy::{PyArray2, PyArrayDyn, PyReadonlyArrayDyn, ToPyArray};
use pyo3::exceptions::{PyIndexError, PyKeyError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::HashMap;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

impl From<AggError> for PyErr {
    fn from(err: AggError) -> PyErr {
        match err {
            AggError::DimensionNotFound { .. } => PyKeyError::new_err(err.to_string()),
            AggError::IndexOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

fn parse_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

/// Convert a python sequence into a coordinate
///
/// Numbers become a float coordinate, ISO-8601 strings a time coordinate and any other
/// strings a label coordinate.
fn extract_coordinate(values: &Bound<'_, PyAny>) -> PyResult<Coordinate> {
    if let Ok(floats) = values.extract::<Vec<f64>>() {
        return Ok(Coordinate::Float(floats));
    }
    let labels: Vec<String> = values.extract()?;
    let times: Option<Vec<NaiveDateTime>> = labels.iter().map(|l| parse_time(l)).collect();
    match times {
        Some(times) if !times.is_empty() => Ok(Coordinate::Time(times)),
        _ => Ok(Coordinate::Label(labels)),
    }
}

fn coordinate_to_py(py: Python<'_>, coordinate: &Coordinate) -> PyObject {
    match coordinate {
        Coordinate::Float(v) => v.clone().into_py(py),
        Coordinate::Time(v) => v
            .iter()
            .map(|t| t.format(TIME_FORMAT).to_string())
            .collect::<Vec<_>>()
            .into_py(py),
        Coordinate::Label(v) => v.clone().into_py(py),
    }
}

fn extract_attrs(attrs: &Bound<'_, PyDict>) -> PyResult<Attributes> {
    let mut out = Attributes::new();
    for (key, value) in attrs.iter() {
        let key: String = key.extract()?;
        let value = if let Ok(n) = value.extract::<f64>() {
            AttrValue::Number(n)
        } else if let Ok(ns) = value.extract::<Vec<f64>>() {
            AttrValue::Numbers(ns)
        } else {
            AttrValue::Text(value.str()?.to_string())
        };
        out.insert(key, value);
    }
    Ok(out)
}

/// A labelled N-dimensional array of floats
///
/// Example:
///     arr = LabelledArray(values, ["time", "lat", "lon"], {"time": times, "lat": lats, "lon": lons})
#[pyclass]
#[pyo3(name = "LabelledArray")]
#[derive(Debug, Clone)]
pub struct PyLabelledArray(pub LabelledArray);

#[pymethods]
impl PyLabelledArray {
    #[new]
    #[pyo3(signature = (values, dims, coords=None, attrs=None))]
    fn new(
        values: PyReadonlyArrayDyn<'_, f64>,
        dims: Vec<String>,
        coords: Option<&Bound<'_, PyDict>>,
        attrs: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<Self> {
        let values = values.as_array().to_owned();
        let mut dimensions = Vec::with_capacity(dims.len());
        for (axis, name) in dims.into_iter().enumerate() {
            let provided = match coords {
                Some(c) => c.get_item(&name)?,
                None => None,
            };
            let coordinate = match provided {
                Some(c) => extract_coordinate(&c)?,
                None => Coordinate::index(values.shape().get(axis).copied().unwrap_or(0)),
            };
            dimensions.push(Dimension::new(name, coordinate));
        }
        let attrs = match attrs {
            Some(a) => extract_attrs(a)?,
            None => Attributes::new(),
        };
        Ok(Self(LabelledArray::with_attrs(values, dimensions, attrs)?))
    }

    #[getter]
    fn values<'py>(&self, py: Python<'py>) -> Bound<'py, PyArrayDyn<f64>> {
        self.0.values().to_pyarray_bound(py)
    }

    #[getter]
    fn dims(&self) -> Vec<String> {
        self.0
            .dimension_names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[getter]
    fn shape(&self) -> Vec<usize> {
        self.0.shape()
    }

    /// Coordinate values of `dim`; times are ISO-8601 strings
    fn coords(&self, py: Python<'_>, dim: &str) -> PyResult<PyObject> {
        Ok(coordinate_to_py(py, self.0.get_dimension(dim)?))
    }

    #[getter]
    fn attrs(&self, py: Python<'_>) -> HashMap<String, PyObject> {
        self.0
            .attributes()
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    AttrValue::Text(s) => s.clone().into_py(py),
                    AttrValue::Number(n) => n.into_py(py),
                    AttrValue::Numbers(ns) => ns.clone().into_py(py),
                };
                (k.clone(), value)
            })
            .collect()
    }

    /// Copy with explicit cell footprints for a curvilinear grid
    ///
    /// `corners` holds four `(x, y)` pairs per cell, row-major over latitude then longitude.
    fn with_cell_corners(&self, corners: Vec<CellCorners>) -> Self {
        Self(self.0.clone().with_cell_corners(corners))
    }

    fn __repr__(&self) -> String {
        format!(
            "LabelledArray(dims={:?}, shape={:?})",
            self.0.dimension_names(),
            self.0.shape()
        )
    }
}

/// A (multi-)polygon region
///
/// Each entry of `polygons` is the exterior ring of one polygon as `(x, y)` pairs.
#[pyclass]
#[pyo3(name = "Geometry")]
#[derive(Debug, Clone)]
pub struct PyGeometry(pub Geometry);

#[pymethods]
impl PyGeometry {
    #[new]
    #[pyo3(signature = (polygons, id=None, crs=None))]
    fn new(polygons: Vec<Vec<Point>>, id: Option<String>, crs: Option<String>) -> PyResult<Self> {
        let mut geometry = Geometry::new(polygons.into_iter().map(Polygon::new).collect());
        if let Some(id) = id {
            geometry = geometry.with_id(id);
        }
        if let Some(crs) = crs {
            geometry = geometry.with_crs(ReferenceSystem(crs));
        }
        geometry.validate()?;
        Ok(Self(geometry))
    }

    #[staticmethod]
    #[pyo3(signature = (min_x, min_y, max_x, max_y, id=None))]
    fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64, id: Option<String>) -> Self {
        let geometry = Geometry::new(vec![Polygon::rectangle(min_x, min_y, max_x, max_y)]);
        Self(match id {
            Some(id) => geometry.with_id(id),
            None => geometry,
        })
    }

    #[staticmethod]
    fn from_toml(string: &str) -> PyResult<Self> {
        let geometry: Geometry =
            toml::from_str(string).map_err(|e| PyValueError::new_err(e.to_string()))?;
        geometry.validate()?;
        Ok(Self(geometry))
    }

    #[getter]
    fn id(&self) -> Option<String> {
        self.0.id.clone()
    }

    #[getter]
    fn crs(&self) -> String {
        self.0.crs.to_string()
    }

    fn area(&self) -> f64 {
        self.0.area()
    }

    fn __repr__(&self) -> String {
        format!(
            "Geometry(id={:?}, polygons={}, crs={})",
            self.0.id,
            self.0.polygons.len(),
            self.0.crs
        )
    }
}

fn parse_mode(mode: &str) -> PyResult<MaskMode> {
    match mode {
        "fractional" => Ok(MaskMode::Fractional),
        "cell_centre" | "cell_center" | "centre" | "center" => Ok(MaskMode::CellCentre),
        _ => Err(PyValueError::new_err(format!("Unknown mask mode: {mode}"))),
    }
}

#[pyclass]
#[pyo3(name = "AggregationEngine")]
#[derive(Debug, Clone)]
pub struct PyAggregationEngine(pub AggregationEngine);

#[pymethods]
impl PyAggregationEngine {
    #[new]
    #[pyo3(signature = (config_toml=None))]
    fn new(config_toml: Option<&str>) -> PyResult<Self> {
        let config = match config_toml {
            Some(s) => EngineConfig::from_toml_str(s)?,
            None => EngineConfig::default(),
        };
        Ok(Self(AggregationEngine::new(config)?))
    }

    /// Run a request given as a TOML document
    fn aggregate(&self, array: &PyLabelledArray, request_toml: &str) -> PyResult<PyLabelledArray> {
        let request = AggregationRequest::from_toml_str(request_toml)?;
        Ok(PyLabelledArray(self.0.aggregate(&array.0, &request)?))
    }

    /// Describe the reduction steps a request would perform
    fn plan(&self, array: &PyLabelledArray, request_toml: &str) -> PyResult<Vec<String>> {
        let request = AggregationRequest::from_toml_str(request_toml)?;
        let plan = self.0.plan(&array.0, &request)?;
        Ok(plan.steps().iter().map(|s| s.to_string()).collect())
    }

    #[pyo3(signature = (array, geometries, mode="fractional", mask_dim="region"))]
    fn masks(
        &self,
        array: &PyLabelledArray,
        geometries: Vec<PyGeometry>,
        mode: &str,
        mask_dim: &str,
    ) -> PyResult<PyLabelledArray> {
        let geometries: Vec<Geometry> = geometries.into_iter().map(|g| g.0).collect();
        Ok(PyLabelledArray(self.0.masks(
            &array.0,
            &geometries,
            parse_mode(mode)?,
            mask_dim,
        )?))
    }

    /// Per-cell weights of `geometry` on the grid of `array`
    #[pyo3(signature = (array, geometry, mode="fractional"))]
    fn weights<'py>(
        &self,
        py: Python<'py>,
        array: &PyLabelledArray,
        geometry: &PyGeometry,
        mode: &str,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let raster = self.0.weight_raster(&array.0, &geometry.0, parse_mode(mode)?)?;
        Ok(raster.weights().to_pyarray_bound(py))
    }

    /// `(hits, misses)` of the weight cache
    fn cache_stats(&self) -> (usize, usize) {
        self.0.cache().stats()
    }

    fn clear_cache(&self) {
        self.0.cache().clear()
    }
}

#[pymodule]
pub fn core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyLabelledArray>()?;
    m.add_class::<PyGeometry>()?;
    m.add_class::<PyAggregationEngine>()?;
    Ok(())
}
