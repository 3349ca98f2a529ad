//! Climatologies and anomalies
//!
//! A climatology groups the time dimension by time of year (month, day of year, week of
//! year or season) and reduces each group. The grouped dimension replaces the time
//! dimension in place and is named after the grouping (`month`, `season`, ...).
//!
//! An anomaly subtracts the climatology entry matching each time step's group:
//!
//! $$ a(t, x) = v(t, x) - c(g(t), x) $$
//!
//! where $g(t)$ is the group key of $t$ (for example its month). Steps whose group is absent
//! from the climatology are missing in the result.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_climatology::Climatology;
//! use gridagg_core::temporal::TimeGrouping;
//!
//! let climatology = Climatology::from_toml_str(
//!     r#"
//! grouping = "season"
//!
//! [reference]
//! start = "1991-01-01T00:00:00"
//! end = "2021-01-01T00:00:00"
//! "#,
//! )
//! .unwrap();
//! assert_eq!(climatology.grouping, TimeGrouping::Season);
//! ```

use chrono::NaiveDateTime;
use gridagg_core::array::{LabelledArray, LabelledData};
use gridagg_core::coordinate::{Coordinate, Dimension};
use gridagg_core::engine::AggregationEngine;
use gridagg_core::errors::{AggError, AggResult};
use gridagg_core::metadata::{anomaly_attributes, ProvenanceRecord};
use gridagg_core::request::AggregationRequest;
use gridagg_core::temporal::TimeGrouping;
use log::{debug, info};
use ndarray::{Axis, Zip};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Half-open time range `[start, end)`; either bound may be omitted
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReferencePeriod {
    #[serde(default)]
    pub start: Option<NaiveDateTime>,
    #[serde(default)]
    pub end: Option<NaiveDateTime>,
}

impl ReferencePeriod {
    pub fn new(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |t: Option<NaiveDateTime>| t.map_or("..".to_string(), |t| t.to_string());
        write!(f, "[{}, {})", bound(self.start), bound(self.end))
    }
}

fn default_bin_width() -> u32 {
    1
}

fn default_policy() -> String {
    "skip".to_string()
}

/// Settings of a time-of-year climatology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Climatology {
    pub grouping: TimeGrouping,
    #[serde(default = "default_bin_width")]
    pub bin_width: u32,
    /// Time dimension; detected from the engine configuration when omitted
    #[serde(default)]
    pub time_dim: Option<String>,
    /// Only time steps in this period contribute to the climatology
    #[serde(default)]
    pub reference: Option<ReferencePeriod>,
    #[serde(default = "default_policy")]
    pub policy: String,
}

impl Default for Climatology {
    fn default() -> Self {
        Self::new(TimeGrouping::Month)
    }
}

impl Climatology {
    pub fn new(grouping: TimeGrouping) -> Self {
        Self {
            grouping,
            bin_width: default_bin_width(),
            time_dim: None,
            reference: None,
            policy: default_policy(),
        }
    }

    pub fn from_toml_str(s: &str) -> AggResult<Self> {
        toml::from_str(s).map_err(|e| AggError::Config(e.to_string()))
    }

    pub fn with_bin_width(mut self, bin_width: u32) -> Self {
        self.bin_width = bin_width;
        self
    }

    pub fn with_time_dim(mut self, name: impl Into<String>) -> Self {
        self.time_dim = Some(name.into());
        self
    }

    pub fn with_reference_period(
        mut self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Self {
        self.reference = Some(ReferencePeriod::new(start, end));
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    fn time_dim(&self, engine: &AggregationEngine, data: &LabelledArray) -> AggResult<String> {
        match &self.time_dim {
            Some(name) => data.axis_of(name).map(|_| name.clone()),
            None => data
                .find_dimension(&engine.config().time_names)
                .map(String::from)
                .ok_or_else(|| AggError::DimensionNotFound {
                    name: engine.config().time_names.first().cloned().unwrap_or_default(),
                    available: data
                        .dimension_names()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                }),
        }
    }

    /// The part of `data` inside the reference period
    fn reference_data<'a>(
        &self,
        engine: &AggregationEngine,
        data: &'a LabelledArray,
    ) -> AggResult<Cow<'a, LabelledArray>> {
        let Some(period) = &self.reference else {
            return Ok(Cow::Borrowed(data));
        };
        let dim = self.time_dim(engine, data)?;
        let selected = data.select_time(&dim, period.start, period.end)?;
        if selected.get_dimension(&dim)?.is_empty() {
            return Err(AggError::InvalidRequest(format!(
                "reference period {period} contains no time steps"
            )));
        }
        Ok(Cow::Owned(selected))
    }

    fn request(&self, dim: String, operator: &str, percentile: Option<f64>) -> AggregationRequest {
        let mut request = AggregationRequest::new(operator)
            .group_by(self.grouping, self.bin_width)
            .with_policy(self.policy.clone());
        if let Some(group_by) = request.group_by.as_mut() {
            group_by.dim = Some(dim);
        }
        request.percentile = percentile;
        request
    }

    /// Reduce each group of `data` with `operator`
    pub fn reduce(
        &self,
        engine: &AggregationEngine,
        data: &LabelledArray,
        operator: &str,
        percentile: Option<f64>,
    ) -> AggResult<LabelledArray> {
        let dim = self.time_dim(engine, data)?;
        let reference = self.reference_data(engine, data)?;
        info!(
            "Computing {} {} climatology over '{}'",
            self.grouping, operator, dim
        );
        engine.aggregate(
            reference.as_ref(),
            &self.request(dim, operator, percentile),
        )
    }

    pub fn mean(&self, engine: &AggregationEngine, data: &LabelledArray) -> AggResult<LabelledArray> {
        self.reduce(engine, data, "mean", None)
    }

    pub fn stdev(&self, engine: &AggregationEngine, data: &LabelledArray) -> AggResult<LabelledArray> {
        self.reduce(engine, data, "std", None)
    }

    pub fn min(&self, engine: &AggregationEngine, data: &LabelledArray) -> AggResult<LabelledArray> {
        self.reduce(engine, data, "min", None)
    }

    pub fn max(&self, engine: &AggregationEngine, data: &LabelledArray) -> AggResult<LabelledArray> {
        self.reduce(engine, data, "max", None)
    }

    pub fn median(&self, engine: &AggregationEngine, data: &LabelledArray) -> AggResult<LabelledArray> {
        self.reduce(engine, data, "median", None)
    }

    /// Climatologies at each quantile in `quantiles` (each in [0, 1])
    ///
    /// The result has a new leading `quantile` dimension.
    pub fn quantiles(
        &self,
        engine: &AggregationEngine,
        data: &LabelledArray,
        quantiles: &[f64],
    ) -> AggResult<LabelledArray> {
        self.stacked(engine, data, "quantile", quantiles)
    }

    /// Climatologies at each percentile in `percentiles` (each in [0, 100])
    ///
    /// The result has a new leading `percentile` dimension.
    pub fn percentiles(
        &self,
        engine: &AggregationEngine,
        data: &LabelledArray,
        percentiles: &[f64],
    ) -> AggResult<LabelledArray> {
        self.stacked(engine, data, "percentile", percentiles)
    }

    fn stacked(
        &self,
        engine: &AggregationEngine,
        data: &LabelledArray,
        operator: &str,
        parameters: &[f64],
    ) -> AggResult<LabelledArray> {
        if parameters.is_empty() {
            return Err(AggError::InvalidRequest(format!(
                "no {operator} values requested"
            )));
        }
        let results = parameters
            .iter()
            .map(|p| self.reduce(engine, data, operator, Some(*p)))
            .collect::<AggResult<Vec<_>>>()?;
        LabelledArray::stack(
            &results,
            Dimension::new(operator, Coordinate::Float(parameters.to_vec())),
        )
    }

    /// Deviation of `data` from a climatology
    ///
    /// `climatology` defaults to [`Climatology::mean`] of `data`. It must have the
    /// dimensions of `data` with the time dimension replaced by the grouped dimension, and
    /// identical coordinates on every other dimension.
    ///
    /// # Errors
    ///
    /// * [`AggError::IncompatibleCoordinates`] if `climatology` does not match `data`
    /// * [`AggError::DimensionNotFound`] if `data` has no time dimension
    pub fn anomaly(
        &self,
        engine: &AggregationEngine,
        data: &LabelledArray,
        climatology: Option<&LabelledArray>,
    ) -> AggResult<LabelledArray> {
        let dim = self.time_dim(engine, data)?;
        let computed;
        let climatology = match climatology {
            Some(c) => c,
            None => {
                computed = self.mean(engine, data)?;
                &computed
            }
        };

        let axis = data.axis_of(&dim)?;
        let group_name = self.grouping.name();
        let expected: Vec<&str> = data
            .dimension_names()
            .into_iter()
            .map(|n| if n == dim { group_name } else { n })
            .collect();
        if climatology.dimension_names() != expected {
            return Err(AggError::IncompatibleCoordinates(format!(
                "climatology dimensions {:?} do not match {:?}",
                climatology.dimension_names(),
                expected
            )));
        }
        for (a, (ours, theirs)) in data
            .dimensions()
            .iter()
            .zip(climatology.dimensions())
            .enumerate()
        {
            if a != axis {
                ours.coordinate.matches(&theirs.coordinate).map_err(|e| {
                    AggError::IncompatibleCoordinates(format!("dimension '{}': {e}", ours.name))
                })?;
            }
        }

        let times = data.dimensions()[axis]
            .coordinate
            .as_times()
            .ok_or_else(|| AggError::InvalidWindow(format!("dimension '{dim}' is not a time axis")))?;
        let groups = &climatology.dimensions()[axis].coordinate;
        let missing = data.missing_value();
        let reference_missing = climatology.missing_value();
        let fill = missing.value();
        let reference_values = climatology.values();

        let mut values = data.values().to_owned();
        let mut unmatched = 0;
        for (t, time) in times.iter().enumerate() {
            let mut slice = values.index_axis_mut(Axis(axis), t);
            let key = self.grouping.key(*time, self.bin_width);
            match self.grouping.position_in(groups, key) {
                Some(g) => {
                    let reference = reference_values.index_axis(Axis(axis), g);
                    Zip::from(&mut slice).and(&reference).for_each(|v, c| {
                        *v = if missing.is_missing(*v) || reference_missing.is_missing(*c) {
                            fill
                        } else {
                            *v - *c
                        };
                    });
                }
                None => {
                    unmatched += 1;
                    slice.fill(fill);
                }
            }
        }
        if unmatched > 0 {
            debug!(
                "{unmatched} time step(s) have no matching {} in the climatology",
                self.grouping
            );
        }

        let record = ProvenanceRecord {
            operator: "anomaly".to_string(),
            grouping: Some(self.grouping.to_string()),
            window: self.reference.map(|r| format!("reference {r}")),
            policy: self.policy.clone(),
            ..Default::default()
        };
        let attrs = anomaly_attributes(data.attributes(), &record);
        Ok(
            LabelledArray::with_attrs(values, data.dimensions().to_vec(), attrs)?
                .with_missing_value(missing),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn defaults() {
        let climatology = Climatology::default();
        assert_eq!(climatology.grouping, TimeGrouping::Month);
        assert_eq!(climatology.bin_width, 1);
        assert_eq!(climatology.policy, "skip");
        assert!(climatology.reference.is_none());
    }

    #[test]
    fn from_toml() {
        let climatology = Climatology::from_toml_str(
            r#"
grouping = "dayofyear"
bin_width = 5
time_dim = "valid_time"
policy = "propagate"

[reference]
end = "2000-01-01T00:00:00"
"#,
        )
        .unwrap();
        assert_eq!(climatology.grouping, TimeGrouping::DayOfYear);
        assert_eq!(climatology.bin_width, 5);
        assert_eq!(climatology.time_dim.as_deref(), Some("valid_time"));
        assert_eq!(
            climatology.reference,
            Some(ReferencePeriod::new(None, Some(t(2000, 1, 1))))
        );
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let result = Climatology::from_toml_str("grouping = \"fortnight\"");
        assert!(matches!(result, Err(AggError::Config(_))));
    }

    #[test]
    fn reference_period_display() {
        let period = ReferencePeriod::new(Some(t(1991, 1, 1)), None);
        assert_eq!(period.to_string(), "[1991-01-01 00:00:00, ..)");
    }

    #[test]
    fn request_targets_time_dim() {
        let request = Climatology::new(TimeGrouping::Season)
            .with_policy("propagate")
            .request("valid_time".to_string(), "percentile", Some(90.0));
        let group_by = request.group_by.unwrap();
        assert_eq!(group_by.dim.as_deref(), Some("valid_time"));
        assert_eq!(group_by.grouping, TimeGrouping::Season);
        assert_eq!(request.percentile, Some(90.0));
        assert_eq!(request.policy, "propagate");
    }
}
