//! Coordinate labels attached to the axes of a [`LabelledArray`](crate::array::LabelledArray).
//!
//! A coordinate is an ordered sequence of labels, one per position along an axis.
//! Three kinds are supported:
//!
//! - [`Coordinate::Float`]: numeric positions such as latitude, longitude or pressure level
//! - [`Coordinate::Time`]: timestamps (proleptic Gregorian calendar)
//! - [`Coordinate::Label`]: free text labels such as region names or seasons

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Relative tolerance used when comparing floating point coordinates.
const COORDINATE_TOLERANCE: f64 = 1e-9;

/// Ordered coordinate values for a single dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum Coordinate {
    /// Numeric coordinate values
    Float(Vec<f64>),
    /// Timestamps
    Time(Vec<NaiveDateTime>),
    /// Text labels
    Label(Vec<String>),
}

impl Coordinate {
    /// Create a numeric coordinate holding the positions `0..len`
    pub fn index(len: usize) -> Self {
        Coordinate::Float((0..len).map(|i| i as f64).collect())
    }

    /// Number of positions along the axis
    pub fn len(&self) -> usize {
        match self {
            Coordinate::Float(v) => v.len(),
            Coordinate::Time(v) => v.len(),
            Coordinate::Label(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the coordinate kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Coordinate::Float(_) => "float",
            Coordinate::Time(_) => "time",
            Coordinate::Label(_) => "label",
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Coordinate::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_times(&self) -> Option<&[NaiveDateTime]> {
        match self {
            Coordinate::Time(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_labels(&self) -> Option<&[String]> {
        match self {
            Coordinate::Label(v) => Some(v),
            _ => None,
        }
    }

    /// Human readable label of a single position
    ///
    /// Returns `None` if `index` is out of range.
    pub fn label(&self, index: usize) -> Option<String> {
        match self {
            Coordinate::Float(v) => v.get(index).map(|x| x.to_string()),
            Coordinate::Time(v) => v
                .get(index)
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Coordinate::Label(v) => v.get(index).cloned(),
        }
    }

    /// Sub-sequence of the coordinate covering `range`
    ///
    /// The caller is responsible for bounds checking.
    pub(crate) fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Coordinate::Float(v) => Coordinate::Float(v[range].to_vec()),
            Coordinate::Time(v) => Coordinate::Time(v[range].to_vec()),
            Coordinate::Label(v) => Coordinate::Label(v[range].to_vec()),
        }
    }

    /// Coordinate made of the positions listed in `indices`
    pub(crate) fn select(&self, indices: &[usize]) -> Self {
        match self {
            Coordinate::Float(v) => Coordinate::Float(indices.iter().map(|&i| v[i]).collect()),
            Coordinate::Time(v) => Coordinate::Time(indices.iter().map(|&i| v[i]).collect()),
            Coordinate::Label(v) => {
                Coordinate::Label(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }

    /// Minimum and maximum of a numeric coordinate
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let values = self.as_floats()?;
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }

    /// Compare two coordinates elementwise
    ///
    /// Float coordinates are compared with a small relative tolerance; times and labels
    /// must match exactly. Returns a description of the first mismatch.
    pub fn matches(&self, other: &Coordinate) -> Result<(), String> {
        if self.len() != other.len() {
            return Err(format!("lengths differ ({} vs {})", self.len(), other.len()));
        }
        match (self, other) {
            (Coordinate::Float(a), Coordinate::Float(b)) => {
                for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                    let scale = 1.0_f64.max(x.abs()).max(y.abs());
                    if (x - y).abs() > COORDINATE_TOLERANCE * scale {
                        return Err(format!("value at position {i} differs ({x} vs {y})"));
                    }
                }
                Ok(())
            }
            (Coordinate::Time(a), Coordinate::Time(b)) => {
                match a.iter().zip(b.iter()).position(|(x, y)| x != y) {
                    Some(i) => Err(format!(
                        "timestamp at position {i} differs ({} vs {})",
                        a[i], b[i]
                    )),
                    None => Ok(()),
                }
            }
            (Coordinate::Label(a), Coordinate::Label(b)) => {
                match a.iter().zip(b.iter()).position(|(x, y)| x != y) {
                    Some(i) => Err(format!(
                        "label at position {i} differs ('{}' vs '{}')",
                        a[i], b[i]
                    )),
                    None => Ok(()),
                }
            }
            _ => Err(format!(
                "coordinate kinds differ ({} vs {})",
                self.kind(),
                other.kind()
            )),
        }
    }
}

/// A named axis together with its coordinate labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub coordinate: Coordinate,
}

impl Dimension {
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            name: name.into(),
            coordinate,
        }
    }

    pub fn len(&self) -> usize {
        self.coordinate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinate.is_empty()
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
    fn float_coordinates_match_within_tolerance() {
        let a = Coordinate::Float(vec![10.0, 20.0, 30.0]);
        let b = Coordinate::Float(vec![10.0, 20.0 + 1e-12, 30.0]);
        assert!(a.matches(&b).is_ok());
    }

    #[test]
    fn float_coordinates_mismatch() {
        let a = Coordinate::Float(vec![10.0, 20.0, 30.0]);
        let b = Coordinate::Float(vec![10.0, 21.0, 30.0]);
        let err = a.matches(&b).unwrap_err();
        assert!(err.contains("position 1"), "{err}");
    }

    #[test]
    fn kinds_must_agree() {
        let a = Coordinate::Float(vec![0.0]);
        let b = Coordinate::Label(vec!["a".to_string()]);
        assert!(a.matches(&b).is_err());
    }

    #[test]
    fn time_labels() {
        let c = Coordinate::Time(vec![t(2000, 1, 1), t(2000, 2, 1)]);
        assert_eq!(c.label(1).unwrap(), "2000-02-01T00:00:00");
        assert_eq!(c.label(2), None);
        assert_eq!(c.kind(), "time");
    }

    #[test]
    fn bounds_of_numeric_coordinate() {
        let c = Coordinate::Float(vec![45.0, -45.0, 0.0]);
        assert_eq!(c.bounds(), Some((-45.0, 45.0)));
        assert_eq!(Coordinate::Label(vec![]).bounds(), None);
    }

    #[test]
    fn slicing_and_selection() {
        let c = Coordinate::Label(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(c.slice(1..3), Coordinate::Label(vec!["b".into(), "c".into()]));
        assert_eq!(c.select(&[2, 0]), Coordinate::Label(vec!["c".into(), "a".into()]));
    }
}
