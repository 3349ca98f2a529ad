//! Calendar resampling presets
//!
//! Each preset is a resampling of the time dimension with a fixed frequency and operator.
//! All other dimensions are kept.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_climatology::presets::{monthly_mean, Preset};
//!
//! let preset: Preset = "monthly_mean".parse().unwrap();
//! assert_eq!(preset, Preset::MonthlyMean);
//! assert_eq!(preset.request().operator, "mean");
//! ```

use gridagg_core::array::{LabelledArray, LabelledData};
use gridagg_core::engine::AggregationEngine;
use gridagg_core::errors::{AggError, AggResult};
use gridagg_core::request::AggregationRequest;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    DailyMean,
    DailyMax,
    DailyMin,
    DailyStd,
    DailySum,
    MonthlyMean,
    MonthlyMax,
    MonthlyMin,
    MonthlySum,
    AnnualMean,
}

impl Preset {
    pub const ALL: [Preset; 10] = [
        Preset::DailyMean,
        Preset::DailyMax,
        Preset::DailyMin,
        Preset::DailyStd,
        Preset::DailySum,
        Preset::MonthlyMean,
        Preset::MonthlyMax,
        Preset::MonthlyMin,
        Preset::MonthlySum,
        Preset::AnnualMean,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::DailyMean => "daily_mean",
            Preset::DailyMax => "daily_max",
            Preset::DailyMin => "daily_min",
            Preset::DailyStd => "daily_std",
            Preset::DailySum => "daily_sum",
            Preset::MonthlyMean => "monthly_mean",
            Preset::MonthlyMax => "monthly_max",
            Preset::MonthlyMin => "monthly_min",
            Preset::MonthlySum => "monthly_sum",
            Preset::AnnualMean => "annual_mean",
        }
    }

    /// Resampling frequency
    pub fn frequency(&self) -> &'static str {
        match self {
            Preset::DailyMean
            | Preset::DailyMax
            | Preset::DailyMin
            | Preset::DailyStd
            | Preset::DailySum => "D",
            Preset::MonthlyMean | Preset::MonthlyMax | Preset::MonthlyMin | Preset::MonthlySum => {
                "M"
            }
            Preset::AnnualMean => "Y",
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            Preset::DailyMean | Preset::MonthlyMean | Preset::AnnualMean => "mean",
            Preset::DailyMax | Preset::MonthlyMax => "max",
            Preset::DailyMin | Preset::MonthlyMin => "min",
            Preset::DailyStd => "std",
            Preset::DailySum | Preset::MonthlySum => "sum",
        }
    }

    /// Request performing this preset
    pub fn request(&self) -> AggregationRequest {
        AggregationRequest::new(self.operator()).resample(self.frequency())
    }

    /// Apply the preset to `data`
    pub fn apply<D: LabelledData + ?Sized>(
        &self,
        engine: &AggregationEngine,
        data: &D,
    ) -> AggResult<LabelledArray> {
        info!("Applying preset {}", self);
        engine.aggregate(data, &self.request())
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = AggError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim().to_ascii_lowercase().replace('-', "_");
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == cleaned)
            .ok_or_else(|| AggError::InvalidRequest(format!("unknown preset '{s}'")))
    }
}

/// Define a free function applying a preset
macro_rules! preset_fn {
    ($($name:ident => $preset:ident),* $(,)?) => {
        $(
            #[doc = concat!("Apply [`Preset::", stringify!($preset), "`] to `data`")]
            pub fn $name<D: LabelledData + ?Sized>(
                engine: &AggregationEngine,
                data: &D,
            ) -> AggResult<LabelledArray> {
                Preset::$preset.apply(engine, data)
            }
        )*
    };
}

preset_fn!(
    daily_mean => DailyMean,
    daily_max => DailyMax,
    daily_min => DailyMin,
    daily_std => DailyStd,
    daily_sum => DailySum,
    monthly_mean => MonthlyMean,
    monthly_max => MonthlyMax,
    monthly_min => MonthlyMin,
    monthly_sum => MonthlySum,
    annual_mean => AnnualMean,
);
