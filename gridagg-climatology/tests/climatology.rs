//! Climatology and preset tests on synthetic seasonal cycles.

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use gridagg_climatology::presets::{annual_mean, daily_max, daily_mean, monthly_sum};
use gridagg_climatology::Climatology;
use gridagg_core::array::{AttrValue, Attributes, LabelledArray, LabelledData};
use gridagg_core::coordinate::{Coordinate, Dimension};
use gridagg_core::engine::AggregationEngine;
use gridagg_core::errors::AggError;
use gridagg_core::metadata::{history_records, LONG_NAME_ATTR, STANDARD_NAME_ATTR};
use gridagg_core::temporal::TimeGrouping;
use ndarray::Array;

fn midnight(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Monthly `(time, lat, lon)` series starting in January of `start_year`
fn monthly_field(
    start_year: i32,
    years: usize,
    value: impl Fn(usize, usize) -> f64,
) -> LabelledArray {
    let months = years * 12;
    let times: Vec<NaiveDateTime> = (0..months)
        .map(|m| midnight(start_year + (m / 12) as i32, (m % 12) as u32 + 1, 15))
        .collect();
    let values = Array::from_shape_fn((months, 2, 3), |(t, i, j)| {
        value(t % 12, t / 12) + (i * 3 + j) as f64 * 100.0
    })
    .into_dyn();
    let mut attrs = Attributes::new();
    attrs.insert(STANDARD_NAME_ATTR.to_string(), AttrValue::from("air_temperature"));
    attrs.insert(LONG_NAME_ATTR.to_string(), AttrValue::from("Near-surface air temperature"));
    LabelledArray::with_attrs(
        values,
        vec![
            Dimension::new("time", Coordinate::Time(times)),
            Dimension::new("lat", Coordinate::Float(vec![-30.0, 30.0])),
            Dimension::new("lon", Coordinate::Float(vec![0.0, 120.0, 240.0])),
        ],
        attrs,
    )
    .unwrap()
}

/// Hourly series over `days` days with value `hour + 24 * day`
fn hourly_series(days: usize) -> LabelledArray {
    let start = midnight(2020, 2, 28);
    let n = days * 24;
    let times: Vec<NaiveDateTime> = (0..n).map(|h| start + Duration::hours(h as i64)).collect();
    let values = Array::from_shape_fn((n, 1), |(h, _)| h as f64).into_dyn();
    LabelledArray::new(
        values,
        vec![
            Dimension::new("time", Coordinate::Time(times)),
            Dimension::new("station", Coordinate::Label(vec!["a".to_string()])),
        ],
    )
    .unwrap()
}

mod climatologies {
    use super::*;

    #[test]
    fn monthly_mean_replaces_time() {
        let data = monthly_field(2000, 3, |month, year| month as f64 + year as f64);
        let engine = AggregationEngine::default();
        let mean = Climatology::new(TimeGrouping::Month)
            .mean(&engine, &data)
            .unwrap();

        assert_eq!(mean.dimension_names(), vec!["month", "lat", "lon"]);
        assert_eq!(mean.shape(), vec![12, 2, 3]);
        assert_eq!(
            mean.get_dimension("month").unwrap(),
            &Coordinate::Float((1..=12).map(f64::from).collect())
        );
        // Years 0, 1 and 2 average to 1
        assert_relative_eq!(mean.values()[[0, 0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(mean.values()[[6, 1, 2]], 507.0, epsilon = 1e-12);
    }

    #[test]
    fn seasons_are_ordered() {
        let data = monthly_field(2000, 2, |month, _| month as f64);
        let engine = AggregationEngine::default();
        let max = Climatology::new(TimeGrouping::Season)
            .max(&engine, &data)
            .unwrap();
        assert_eq!(
            max.get_dimension("season").unwrap(),
            &Coordinate::Label(
                ["DJF", "MAM", "JJA", "SON"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            )
        );
        // December is month index 11
        assert_eq!(max.values()[[0, 0, 0]], 11.0);
        assert_eq!(max.values()[[2, 0, 0]], 7.0);
    }

    #[test]
    fn stdev_of_constant_cycle_is_zero() {
        let data = monthly_field(1990, 4, |month, _| (month as f64).cos());
        let engine = AggregationEngine::default();
        let stdev = Climatology::default().stdev(&engine, &data).unwrap();
        assert!(stdev.values().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn quantiles_add_leading_dimension() {
        let data = monthly_field(2000, 5, |_, year| year as f64);
        let engine = AggregationEngine::default();
        let quantiles = Climatology::default()
            .quantiles(&engine, &data, &[0.0, 0.5, 1.0])
            .unwrap();
        assert_eq!(quantiles.dimension_names(), vec!["quantile", "month", "lat", "lon"]);
        assert_eq!(quantiles.values()[[0, 3, 0, 0]], 0.0);
        assert_eq!(quantiles.values()[[1, 3, 0, 0]], 2.0);
        assert_eq!(quantiles.values()[[2, 3, 0, 0]], 4.0);

        let percentiles = Climatology::default()
            .percentiles(&engine, &data, &[50.0])
            .unwrap();
        assert_eq!(percentiles.dimension_names()[0], "percentile");
        assert_eq!(percentiles.values()[[0, 3, 0, 0]], 2.0);
    }

    #[test]
    fn quantile_out_of_range_is_rejected() {
        let data = monthly_field(2000, 1, |_, _| 0.0);
        let result =
            Climatology::default().quantiles(&AggregationEngine::default(), &data, &[1.5]);
        assert!(matches!(result, Err(AggError::InvalidPercentile(_))));
    }

    #[test]
    fn reference_period_limits_contributors() {
        let data = monthly_field(2000, 3, |_, year| year as f64 * 10.0);
        let engine = AggregationEngine::default();
        let climatology = Climatology::default()
            .with_reference_period(Some(midnight(2001, 1, 1)), Some(midnight(2002, 1, 1)));
        let mean = climatology.mean(&engine, &data).unwrap();
        assert!(mean
            .values()
            .iter()
            .zip(monthly_field(2000, 1, |_, _| 10.0).values().iter())
            .all(|(a, b)| (a - b).abs() < 1e-12));

        let empty = Climatology::default()
            .with_reference_period(Some(midnight(2050, 1, 1)), None)
            .mean(&engine, &data);
        assert!(matches!(empty, Err(AggError::InvalidRequest(_))));
    }
}

mod anomalies {
    use super::*;

    #[test]
    fn pure_seasonal_cycle_has_zero_anomaly() {
        let data = monthly_field(1995, 3, |month, _| 5.0 * (month as f64).sin());
        let engine = AggregationEngine::default();
        let anomaly = Climatology::default().anomaly(&engine, &data, None).unwrap();
        assert_eq!(anomaly.shape(), data.shape());
        assert!(anomaly.values().iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn anomaly_against_reference_period() {
        let data = monthly_field(2000, 3, |month, year| month as f64 + year as f64);
        let engine = AggregationEngine::default();
        let climatology = Climatology::default()
            .with_reference_period(None, Some(midnight(2001, 1, 1)));
        let anomaly = climatology.anomaly(&engine, &data, None).unwrap();
        // Year 2 sits two units above the year-0 reference
        assert_relative_eq!(anomaly.values()[[24 + 4, 1, 1]], 2.0, epsilon = 1e-12);
        assert_relative_eq!(anomaly.values()[[4, 1, 1]], 0.0, epsilon = 1e-12);

        assert_eq!(
            anomaly.text_attribute(STANDARD_NAME_ATTR),
            Some("air_temperature_anomaly")
        );
        assert_eq!(
            anomaly.text_attribute(LONG_NAME_ATTR),
            Some("Near-surface air temperature anomaly")
        );
        let records = history_records(anomaly.attributes());
        assert_eq!(records.last().unwrap().operator, "anomaly");
    }

    #[test]
    fn missing_groups_are_missing() {
        let data = monthly_field(2000, 1, |month, _| month as f64);
        let engine = AggregationEngine::default();
        let climatology = Climatology::default();
        let summer_only = data.slice("time", 5..8).unwrap();
        let reference = climatology.mean(&engine, &summer_only).unwrap();
        let anomaly = climatology
            .anomaly(&engine, &data, Some(&reference))
            .unwrap();
        assert!(anomaly.values()[[0, 0, 0]].is_nan());
        assert_eq!(anomaly.values()[[6, 0, 0]], 0.0);
    }

    #[test]
    fn mismatched_climatology_is_rejected() {
        let data = monthly_field(2000, 1, |_, _| 1.0);
        let engine = AggregationEngine::default();
        let seasonal = Climatology::new(TimeGrouping::Season)
            .mean(&engine, &data)
            .unwrap();
        let result = Climatology::default().anomaly(&engine, &data, Some(&seasonal));
        assert!(matches!(result, Err(AggError::IncompatibleCoordinates(_))));
    }
}

mod presets {
    use super::*;

    #[test]
    fn daily_presets() {
        let data = hourly_series(3);
        let engine = AggregationEngine::default();

        let mean = daily_mean(&engine, &data).unwrap();
        assert_eq!(mean.shape(), vec![3, 1]);
        assert_relative_eq!(mean.values()[[0, 0]], 11.5, epsilon = 1e-12);
        assert_relative_eq!(mean.values()[[2, 0]], 59.5, epsilon = 1e-12);

        let max = daily_max(&engine, &data).unwrap();
        assert_eq!(max.values()[[1, 0]], 47.0);
        assert_eq!(
            max.get_dimension("time").unwrap(),
            &Coordinate::Time(vec![
                midnight(2020, 2, 28),
                midnight(2020, 2, 29),
                midnight(2020, 3, 1)
            ])
        );
    }

    #[test]
    fn monthly_and_annual_presets() {
        let data = monthly_field(2010, 2, |_, _| 1.0);
        let engine = AggregationEngine::default();

        let sums = monthly_sum(&engine, &data).unwrap();
        assert_eq!(sums.shape(), vec![24, 2, 3]);
        assert_eq!(sums.values()[[5, 0, 0]], 1.0);

        let annual = annual_mean(&engine, &data).unwrap();
        assert_eq!(annual.shape(), vec![2, 2, 3]);
        assert_eq!(annual.values()[[1, 1, 2]], 501.0);
    }
}
