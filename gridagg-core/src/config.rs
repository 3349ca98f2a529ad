//! Engine configuration
//!
//! ```rust
//! use gridagg_core::config::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str("cache_capacity = 8").unwrap();
//! assert_eq!(config.cache_capacity, 8);
//! assert_eq!(config.compensated_sum_threshold, 64);
//! ```

use crate::errors::{AggError, AggResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of rasterised geometries kept in the weight cache
    pub cache_capacity: usize,
    /// Reductions over more samples than this use compensated summation
    pub compensated_sum_threshold: usize,
    /// Output cell count above which reductions run in parallel
    pub parallel_threshold: usize,
    /// Candidate names of the latitude dimension, tried in order (case-insensitive)
    pub latitude_names: Vec<String>,
    pub longitude_names: Vec<String>,
    pub time_names: Vec<String>,
    /// Rounding error accepted in fractional mask weights before a warning is logged
    pub weight_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let names = |n: &[&str]| n.iter().map(|s| s.to_string()).collect();
        Self {
            cache_capacity: 64,
            compensated_sum_threshold: 64,
            parallel_threshold: 4096,
            latitude_names: names(&["latitude", "lat", "y"]),
            longitude_names: names(&["longitude", "lon", "x"]),
            time_names: names(&["time", "t", "valid_time"]),
            weight_tolerance: 1e-9,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> AggResult<Self> {
        let config: EngineConfig = toml::from_str(s).map_err(|e| AggError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AggResult<()> {
        if !(self.weight_tolerance >= 0.0) {
            return Err(AggError::Config(format!(
                "weight_tolerance must be non-negative, got {}",
                self.weight_tolerance
            )));
        }
        for (field, names) in [
            ("latitude_names", &self.latitude_names),
            ("longitude_names", &self.longitude_names),
            ("time_names", &self.time_names),
        ] {
            if names.is_empty() {
                return Err(AggError::Config(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}
