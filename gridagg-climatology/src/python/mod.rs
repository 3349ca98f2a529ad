use crate::climatology::Climatology;
use crate::presets::Preset;
use chrono::NaiveDateTime;
use gridagg_core::python::{PyAggregationEngine, PyLabelledArray};
use gridagg_core::temporal::TimeGrouping;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

fn parse_grouping(grouping: &str) -> PyResult<TimeGrouping> {
    match grouping.to_ascii_lowercase().as_str() {
        "month" => Ok(TimeGrouping::Month),
        "dayofyear" | "day_of_year" => Ok(TimeGrouping::DayOfYear),
        "weekofyear" | "week_of_year" => Ok(TimeGrouping::WeekOfYear),
        "season" => Ok(TimeGrouping::Season),
        other => Err(PyValueError::new_err(format!("Unknown grouping: {other}"))),
    }
}

fn parse_bound(value: Option<&str>) -> PyResult<Option<NaiveDateTime>> {
    value
        .map(|v| {
            NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S")
                .map_err(|e| PyValueError::new_err(format!("Invalid time '{v}': {e}")))
        })
        .transpose()
}

/// Apply a named preset such as "monthly_mean" to `array`
#[pyfunction]
fn preset(
    engine: &PyAggregationEngine,
    array: &PyLabelledArray,
    name: &str,
) -> PyResult<PyLabelledArray> {
    let preset: Preset = name.parse()?;
    Ok(PyLabelledArray(preset.apply(&engine.0, &array.0)?))
}

/// Names of the available presets
#[pyfunction]
fn presets() -> Vec<&'static str> {
    Preset::ALL.iter().map(|p| p.name()).collect()
}

/// Time-of-year climatology
///
/// Example:
///     clim = Climatology("season", reference_start="1991-01-01T00:00:00")
///     mean = clim.mean(engine, array)
///     anomaly = clim.anomaly(engine, array, mean)
#[pyclass]
#[pyo3(name = "Climatology")]
#[derive(Debug, Clone)]
pub struct PyClimatology(pub Climatology);

#[pymethods]
impl PyClimatology {
    #[new]
    #[pyo3(signature = (grouping="month", bin_width=1, time_dim=None, reference_start=None, reference_end=None, policy="skip"))]
    fn new(
        grouping: &str,
        bin_width: u32,
        time_dim: Option<String>,
        reference_start: Option<&str>,
        reference_end: Option<&str>,
        policy: &str,
    ) -> PyResult<Self> {
        let mut climatology = Climatology::new(parse_grouping(grouping)?)
            .with_bin_width(bin_width)
            .with_policy(policy);
        if let Some(dim) = time_dim {
            climatology = climatology.with_time_dim(dim);
        }
        if reference_start.is_some() || reference_end.is_some() {
            climatology = climatology.with_reference_period(
                parse_bound(reference_start)?,
                parse_bound(reference_end)?,
            );
        }
        Ok(Self(climatology))
    }

    #[staticmethod]
    fn from_toml(string: &str) -> PyResult<Self> {
        Ok(Self(Climatology::from_toml_str(string)?))
    }

    #[getter]
    fn grouping(&self) -> &'static str {
        self.0.grouping.name()
    }

    fn mean(&self, engine: &PyAggregationEngine, array: &PyLabelledArray) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(self.0.mean(&engine.0, &array.0)?))
    }

    fn stdev(&self, engine: &PyAggregationEngine, array: &PyLabelledArray) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(self.0.stdev(&engine.0, &array.0)?))
    }

    fn min(&self, engine: &PyAggregationEngine, array: &PyLabelledArray) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(self.0.min(&engine.0, &array.0)?))
    }

    fn max(&self, engine: &PyAggregationEngine, array: &PyLabelledArray) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(self.0.max(&engine.0, &array.0)?))
    }

    fn median(&self, engine: &PyAggregationEngine, array: &PyLabelledArray) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(self.0.median(&engine.0, &array.0)?))
    }

    fn quantiles(
        &self,
        engine: &PyAggregationEngine,
        array: &PyLabelledArray,
        quantiles: Vec<f64>,
    ) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(
            self.0.quantiles(&engine.0, &array.0, &quantiles)?,
        ))
    }

    fn percentiles(
        &self,
        engine: &PyAggregationEngine,
        array: &PyLabelledArray,
        percentiles: Vec<f64>,
    ) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(
            self.0.percentiles(&engine.0, &array.0, &percentiles)?,
        ))
    }

    #[pyo3(signature = (engine, array, climatology=None))]
    fn anomaly(
        &self,
        engine: &PyAggregationEngine,
        array: &PyLabelledArray,
        climatology: Option<&PyLabelledArray>,
    ) -> PyResult<PyLabelledArray> {
        Ok(PyLabelledArray(self.0.anomaly(
            &engine.0,
            &array.0,
            climatology.map(|c| &c.0),
        )?))
    }
}

#[pymodule]
pub fn climatology(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyClimatology>()?;
    m.add_function(wrap_pyfunction!(preset, m)?)?;
    m.add_function(wrap_pyfunction!(presets, m)?)?;
    Ok(())
}
