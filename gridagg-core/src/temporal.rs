//! Time windows and time-of-year groupings
//!
//! Resampling assigns a sample at timestamp `T` to the window with `start <= T < next start`.
//! Month and year windows follow calendar boundaries (so a February window spans 28 or 29
//! days); hour, day and week windows have a fixed duration. Weeks start on Monday.
//! Every window between the first and last sample is emitted, including empty ones.
//!
//! # Anchoring
//!
//! Multi-hour windows are aligned to midnight of the day holding the earliest sample, so
//! `"3H"` windows start at 00:00, 03:00, 06:00 and so on whatever hour the data starts at.
//! Day, week, month and year windows start at the beginning of the unit holding the
//! earliest sample (midnight, Monday, the 1st, 1 January) and step by the multiple from
//! there.
//!
//! # Examples
//!
//! ```rust
//! use gridagg_core::temporal::{Frequency, WindowUnit};
//!
//! let freq: Frequency = "every 12 months".parse().unwrap();
//! assert_eq!(freq, Frequency::new(12, WindowUnit::Month));
//! assert_eq!("3H".parse::<Frequency>().unwrap(), Frequency::new(3, WindowUnit::Hour));
//! ```

use crate::coordinate::Coordinate;
use crate::errors::{AggError, AggResult};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl WindowUnit {
    fn symbol(&self) -> &'static str {
        match self {
            WindowUnit::Hour => "H",
            WindowUnit::Day => "D",
            WindowUnit::Week => "W",
            WindowUnit::Month => "M",
            WindowUnit::Year => "Y",
        }
    }

    /// Whether the unit follows calendar boundaries rather than a fixed duration
    pub fn is_calendar(&self) -> bool {
        matches!(self, WindowUnit::Month | WindowUnit::Year)
    }
}

/// Resampling frequency: a positive multiple of a [`WindowUnit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frequency {
    pub multiple: u32,
    pub unit: WindowUnit,
}

impl Frequency {
    pub fn new(multiple: u32, unit: WindowUnit) -> Self {
        Self { multiple, unit }
    }

    /// Start of the first window, which holds `t`
    fn floor(&self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        let midnight = |d: NaiveDate| d.and_time(chrono::NaiveTime::MIN);
        match self.unit {
            WindowUnit::Hour => {
                let hour = t.hour() - t.hour() % self.multiple.max(1);
                midnight(date) + Duration::hours(hour as i64)
            }
            WindowUnit::Day => midnight(date),
            WindowUnit::Week => {
                midnight(date) - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            WindowUnit::Month => midnight(date.with_day(1).unwrap_or(date)),
            WindowUnit::Year => midnight(
                NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
            ),
        }
    }

    /// Start of the window following the one starting at `start`
    fn advance(&self, start: NaiveDateTime) -> AggResult<NaiveDateTime> {
        let m = self.multiple as i64;
        let next = match self.unit {
            WindowUnit::Hour => start.checked_add_signed(Duration::hours(m)),
            WindowUnit::Day => start.checked_add_signed(Duration::days(m)),
            WindowUnit::Week => start.checked_add_signed(Duration::weeks(m)),
            WindowUnit::Month => start.checked_add_months(Months::new(self.multiple)),
            WindowUnit::Year => self
                .multiple
                .checked_mul(12)
                .and_then(|months| start.checked_add_months(Months::new(months))),
        };
        next.ok_or_else(|| AggError::InvalidWindow(format!("window after {start} overflows")))
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.multiple, self.unit.symbol())
    }
}

impl FromStr for Frequency {
    type Err = AggError;

    /// Parse pandas-like aliases (`"D"`, `"3H"`, `"MS"`, `"12M"`, `"A"`) and long forms
    /// (`"day"`, `"monthly"`, `"every 12 months"`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s.trim().to_ascii_lowercase();
        let cleaned = cleaned.strip_prefix("every").unwrap_or(&cleaned).trim();
        let split = cleaned
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(cleaned.len());
        let (digits, unit) = cleaned.split_at(split);
        let multiple = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| AggError::InvalidWindow(format!("invalid multiple in '{s}'")))?
        };
        if multiple == 0 {
            return Err(AggError::InvalidWindow(format!(
                "window multiple must be positive in '{s}'"
            )));
        }
        let unit = match unit.trim() {
            "h" | "hour" | "hours" | "hourly" => WindowUnit::Hour,
            "d" | "day" | "days" | "daily" => WindowUnit::Day,
            "w" | "week" | "weeks" | "weekly" => WindowUnit::Week,
            "m" | "ms" | "month" | "months" | "monthly" => WindowUnit::Month,
            "y" | "ys" | "a" | "as" | "year" | "years" | "yearly" | "annual" => WindowUnit::Year,
            other => {
                return Err(AggError::InvalidWindow(format!(
                    "unrecognised window unit '{other}' in '{s}'"
                )))
            }
        };
        Ok(Frequency::new(multiple, unit))
    }
}

/// Contiguous windows along a time axis
#[derive(Debug, Clone, PartialEq)]
pub struct Windows {
    /// Window start labels, strictly increasing and without gaps
    pub starts: Vec<NaiveDateTime>,
    /// Sample positions assigned to each window
    pub members: Vec<Vec<usize>>,
}

/// Largest accepted time shift, one year either way
pub const MAX_TIME_SHIFT_HOURS: f64 = 366.0 * 24.0;

/// Shift timestamps by a number of hours (e.g. to move UTC data into local time)
///
/// # Errors
///
/// Returns [`AggError::InvalidWindow`] if `hours` is not finite, exceeds
/// [`MAX_TIME_SHIFT_HOURS`] in magnitude, or moves a timestamp out of the representable range.
pub fn shift_times(times: &[NaiveDateTime], hours: f64) -> AggResult<Vec<NaiveDateTime>> {
    check_time_shift(hours)?;
    if hours == 0.0 {
        return Ok(times.to_vec());
    }
    let shift = Duration::seconds((hours * 3600.0).round() as i64);
    times
        .iter()
        .map(|t| {
            t.checked_add_signed(shift).ok_or_else(|| {
                AggError::InvalidWindow(format!("shifting {t} by {hours}h overflows"))
            })
        })
        .collect()
}

/// Check a time shift is finite and at most [`MAX_TIME_SHIFT_HOURS`] in magnitude
pub fn check_time_shift(hours: f64) -> AggResult<()> {
    if !hours.is_finite() || hours.abs() > MAX_TIME_SHIFT_HOURS {
        return Err(AggError::InvalidWindow(format!(
            "time shift must be finite and within ±{MAX_TIME_SHIFT_HOURS} hours, got {hours}"
        )));
    }
    Ok(())
}

/// Assign each timestamp to a resampling window
///
/// # Errors
///
/// Returns [`AggError::InvalidWindow`] if `times` is empty.
pub fn resample_windows(times: &[NaiveDateTime], freq: Frequency) -> AggResult<Windows> {
    let (Some(first), Some(last)) = (times.iter().min(), times.iter().max()) else {
        return Err(AggError::InvalidWindow(
            "cannot resample an empty time axis".to_string(),
        ));
    };
    let mut starts = vec![freq.floor(*first)];
    loop {
        let next = freq.advance(starts[starts.len() - 1])?;
        if next > *last {
            break;
        }
        starts.push(next);
    }
    let mut members = vec![Vec::new(); starts.len()];
    for (i, t) in times.iter().enumerate() {
        // Index of the last window starting at or before t
        let w = starts.partition_point(|s| s <= t) - 1;
        members[w].push(i);
    }
    Ok(Windows { starts, members })
}

/// Time-of-year grouping used for climatologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrouping {
    Month,
    #[serde(alias = "day_of_year")]
    DayOfYear,
    #[serde(alias = "week_of_year")]
    WeekOfYear,
    Season,
}

const SEASONS: [&str; 4] = ["DJF", "MAM", "JJA", "SON"];

impl TimeGrouping {
    pub fn name(&self) -> &'static str {
        match self {
            TimeGrouping::Month => "month",
            TimeGrouping::DayOfYear => "dayofyear",
            TimeGrouping::WeekOfYear => "weekofyear",
            TimeGrouping::Season => "season",
        }
    }

    /// Group key of `t`
    ///
    /// Numeric groupings with `bin_width > 1` are labelled by the first value of the bin
    /// (e.g. months 1..=3 share key 1 for a bin width of 3). Seasons are keyed 0..4 in
    /// DJF, MAM, JJA, SON order and ignore the bin width.
    pub fn key(&self, t: NaiveDateTime, bin_width: u32) -> u32 {
        let bin = |v: u32| ((v - 1) / bin_width.max(1)) * bin_width.max(1) + 1;
        match self {
            TimeGrouping::Month => bin(t.month()),
            TimeGrouping::DayOfYear => bin(t.ordinal()),
            TimeGrouping::WeekOfYear => bin(t.iso_week().week()),
            TimeGrouping::Season => (t.month() % 12) / 3,
        }
    }

    /// Coordinate labelling the given sorted keys
    pub fn coordinate(&self, keys: &[u32]) -> Coordinate {
        match self {
            TimeGrouping::Season => Coordinate::Label(
                keys.iter()
                    .map(|k| SEASONS[*k as usize % 4].to_string())
                    .collect(),
            ),
            _ => Coordinate::Float(keys.iter().map(|k| *k as f64).collect()),
        }
    }

    /// Position of `key` within a coordinate produced by [`TimeGrouping::coordinate`]
    pub fn position_in(&self, coordinate: &Coordinate, key: u32) -> Option<usize> {
        match (self, coordinate) {
            (TimeGrouping::Season, Coordinate::Label(labels)) => {
                labels.iter().position(|l| l == SEASONS[key as usize % 4])
            }
            (_, Coordinate::Float(values)) => values.iter().position(|v| *v == key as f64),
            _ => None,
        }
    }
}

impl fmt::Display for TimeGrouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Groups of sample positions sharing a time-of-year key
#[derive(Debug, Clone, PartialEq)]
pub struct Groups {
    pub coordinate: Coordinate,
    pub members: Vec<Vec<usize>>,
}

/// Group timestamps by time of year
///
/// Only keys present in the data are emitted, in increasing order.
pub fn group_times(times: &[NaiveDateTime], grouping: TimeGrouping, bin_width: u32) -> Groups {
    let mut keyed: std::collections::BTreeMap<u32, Vec<usize>> = Default::default();
    for (i, t) in times.iter().enumerate() {
        keyed.entry(grouping.key(*t, bin_width)).or_default().push(i);
    }
    let keys: Vec<u32> = keyed.keys().copied().collect();
    Groups {
        coordinate: grouping.coordinate(&keys),
        members: keyed.into_values().collect(),
    }
}

/// Moving windows of `size` positions along an axis of length `len`
///
/// Trailing windows end at each position; centred windows span
/// `i - size/2 ..= i + (size-1)/2`. Windows are truncated at the axis ends.
pub fn rolling_windows(len: usize, size: usize, center: bool) -> Vec<Vec<usize>> {
    (0..len)
        .map(|i| {
            let (start, end) = if center {
                (i as isize - (size / 2) as isize, i + (size - 1) / 2)
            } else {
                (i as isize - size as isize + 1, i)
            };
            (start.max(0) as usize..=end.min(len.saturating_sub(1))).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn daily(year: i32) -> Vec<NaiveDateTime> {
        let start = t(year, 1, 1, 12);
        let days = if NaiveDate::from_ymd_opt(year, 12, 31).unwrap().ordinal() == 366 {
            366
        } else {
            365
        };
        (0..days).map(|d| start + Duration::days(d)).collect()
    }

    #[test]
    fn parse_frequencies() {
        assert_eq!(
            "D".parse::<Frequency>().unwrap(),
            Frequency::new(1, WindowUnit::Day)
        );
        assert_eq!(
            "12M".parse::<Frequency>().unwrap(),
            Frequency::new(12, WindowUnit::Month)
        );
        assert_eq!(
            "annual".parse::<Frequency>().unwrap(),
            Frequency::new(1, WindowUnit::Year)
        );
        assert!(matches!(
            "5 fortnights".parse::<Frequency>(),
            Err(AggError::InvalidWindow(_))
        ));
        assert!("0D".parse::<Frequency>().is_err());
    }

    #[test]
    fn monthly_windows_non_leap_year() {
        let windows = resample_windows(&daily(2001), "M".parse().unwrap()).unwrap();
        assert_eq!(windows.starts.len(), 12);
        assert_eq!(windows.members[1].len(), 28);
        assert_eq!(windows.starts[1], t(2001, 2, 1, 0));
    }

    #[test]
    fn monthly_windows_leap_year() {
        let windows = resample_windows(&daily(2000), "M".parse().unwrap()).unwrap();
        assert_eq!(windows.starts.len(), 12);
        assert_eq!(windows.members[1].len(), 29);
        let total: usize = windows.members.iter().map(Vec::len).sum();
        assert_eq!(total, 366);
    }

    #[test]
    fn empty_windows_are_kept() {
        let times = vec![t(2000, 1, 15, 0), t(2000, 4, 15, 0)];
        let windows = resample_windows(&times, "M".parse().unwrap()).unwrap();
        assert_eq!(windows.starts.len(), 4);
        assert!(windows.members[1].is_empty());
        assert!(windows.members[2].is_empty());
        assert_eq!(windows.members[3], vec![1]);
    }

    #[test]
    fn weekly_windows_start_on_monday() {
        // 2024-01-03 is a Wednesday
        let windows = resample_windows(&[t(2024, 1, 3, 6)], "W".parse().unwrap()).unwrap();
        assert_eq!(windows.starts[0], t(2024, 1, 1, 0));
    }

    #[test]
    fn hourly_multiple() {
        let times: Vec<_> = (0..6).map(|h| t(2020, 1, 1, h)).collect();
        let windows = resample_windows(&times, "3H".parse().unwrap()).unwrap();
        assert_eq!(windows.members, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn multi_hour_windows_align_to_midnight() {
        let times: Vec<_> = (4..9).map(|h| t(2020, 1, 1, h)).collect();
        let windows = resample_windows(&times, "3H".parse().unwrap()).unwrap();
        assert_eq!(windows.starts, vec![t(2020, 1, 1, 3), t(2020, 1, 1, 6)]);
        assert_eq!(windows.members, vec![vec![0, 1], vec![2, 3, 4]]);

        // Windows longer than a day start at midnight
        let windows = resample_windows(&times, "36H".parse().unwrap()).unwrap();
        assert_eq!(windows.starts, vec![t(2020, 1, 1, 0)]);
    }

    #[test]
    fn huge_year_multiple_is_rejected() {
        let freq: Frequency = "400000000Y".parse().unwrap();
        let result = resample_windows(&[t(2000, 1, 1, 0), t(2001, 1, 1, 0)], freq);
        assert!(matches!(result, Err(AggError::InvalidWindow(_))));
    }

    #[test]
    fn time_shift_moves_samples_across_days() {
        let shifted = shift_times(&[t(2020, 1, 1, 22)], 3.0).unwrap();
        assert_eq!(shifted[0], t(2020, 1, 2, 1));
    }

    #[test]
    fn invalid_time_shifts_are_rejected() {
        for hours in [f64::NAN, f64::INFINITY, 1e12, -1e6] {
            assert!(matches!(
                shift_times(&[t(2020, 1, 1, 0)], hours),
                Err(AggError::InvalidWindow(_))
            ));
        }
        let end = NaiveDateTime::MAX;
        assert!(matches!(
            shift_times(&[end], 1.0),
            Err(AggError::InvalidWindow(_))
        ));
    }

    #[test]
    fn seasons_in_meteorological_order() {
        let times = vec![t(2000, 7, 1, 0), t(2000, 12, 1, 0), t(2000, 1, 1, 0), t(2000, 4, 1, 0)];
        let groups = group_times(&times, TimeGrouping::Season, 1);
        assert_eq!(
            groups.coordinate,
            Coordinate::Label(vec!["DJF".into(), "MAM".into(), "JJA".into()])
        );
        assert_eq!(groups.members[0], vec![1, 2]);
        assert_eq!(
            TimeGrouping::Season.position_in(&groups.coordinate, TimeGrouping::Season.key(t(2001, 2, 1, 0), 1)),
            Some(0)
        );
    }

    #[test]
    fn month_bins() {
        let times: Vec<_> = (1..=12).map(|m| t(2000, m, 1, 0)).collect();
        let groups = group_times(&times, TimeGrouping::Month, 3);
        assert_eq!(groups.coordinate, Coordinate::Float(vec![1.0, 4.0, 7.0, 10.0]));
        assert_eq!(groups.members[1], vec![3, 4, 5]);
    }

    #[test]
    fn rolling_windows_trailing_and_centred() {
        assert_eq!(
            rolling_windows(4, 3, false),
            vec![vec![0], vec![0, 1], vec![0, 1, 2], vec![1, 2, 3]]
        );
        assert_eq!(
            rolling_windows(4, 3, true),
            vec![vec![0, 1], vec![0, 1, 2], vec![1, 2, 3], vec![2, 3]]
        );
    }
}
