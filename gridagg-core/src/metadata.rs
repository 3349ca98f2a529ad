//! Attribute propagation for reduced arrays
//!
//! Rules applied to every result:
//!
//! - `units` pass through unchanged (including for `sum`); `count` results have units `"1"`
//! - a CF `cell_methods` entry such as `"time: mean"` is appended
//! - a machine-readable [`ProvenanceRecord`] is appended to `history` as one JSON line,
//!   never overwriting earlier entries
//!
//! Dimension bookkeeping (dropping reduced dimensions, window labels, region labels) is done
//! by the planner when it declares the output layout.

use crate::array::{AttrValue, Attributes};
use crate::request::Operator;
use serde::{Deserialize, Serialize};

pub const UNITS_ATTR: &str = "units";
pub const HISTORY_ATTR: &str = "history";
pub const CELL_METHODS_ATTR: &str = "cell_methods";
pub const STANDARD_NAME_ATTR: &str = "standard_name";
pub const LONG_NAME_ATTR: &str = "long_name";

/// Description of one aggregation, recorded in the `history` attribute
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<f64>,
    /// Dimensions collapsed entirely
    #[serde(default)]
    pub dims: Vec<String>,
    /// Resampling frequency (e.g. `"1M"`) or rolling window description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<String>,
    /// Identifiers (or positions) of the geometries used as masks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<String>>,
    pub policy: String,
}

impl ProvenanceRecord {
    pub fn to_json(&self) -> String {
        // Serialising plain strings and numbers cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Append `line` to a newline separated text attribute
fn append_line(attrs: &mut Attributes, name: &str, line: &str, separator: &str) {
    let updated = match attrs.get(name).and_then(AttrValue::as_text) {
        Some(existing) if !existing.is_empty() => format!("{existing}{separator}{line}"),
        _ => line.to_string(),
    };
    attrs.insert(name.to_string(), AttrValue::Text(updated));
}

/// Append a provenance record to the `history` attribute
pub fn append_history(attrs: &mut Attributes, record: &ProvenanceRecord) {
    append_line(attrs, HISTORY_ATTR, &record.to_json(), "\n");
}

/// Parse every JSON provenance line of a `history` attribute
///
/// Free-text lines written by other tools are skipped.
pub fn history_records(attrs: &Attributes) -> Vec<ProvenanceRecord> {
    attrs
        .get(HISTORY_ATTR)
        .and_then(AttrValue::as_text)
        .map(|history| {
            history
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Attributes of a reduction result
///
/// # Arguments
///
/// * `input` - Attributes of the input array
/// * `operator` - Applied operator
/// * `method_dims` - Dimensions named in the `cell_methods` entry
/// * `area_weighted` - Whether spatial weights were applied
/// * `record` - Provenance appended to `history`
pub fn reduced_attributes(
    input: &Attributes,
    operator: Operator,
    method_dims: &[String],
    area_weighted: bool,
    record: &ProvenanceRecord,
) -> Attributes {
    let mut attrs = input.clone();
    if operator == Operator::Count {
        attrs.insert(UNITS_ATTR.to_string(), AttrValue::from("1"));
    }
    if !method_dims.is_empty() {
        let mut method = format!("{}: {}", method_dims.join(": "), operator.cell_method());
        if area_weighted {
            method.push_str(" (area-weighted)");
        }
        append_line(&mut attrs, CELL_METHODS_ATTR, &method, " ");
    }
    append_history(&mut attrs, record);
    attrs
}

/// Attributes of an anomaly derived from `input`
///
/// `standard_name` gains the suffix `_anomaly` and `long_name` the suffix ` anomaly`.
pub fn anomaly_attributes(input: &Attributes, record: &ProvenanceRecord) -> Attributes {
    let mut attrs = input.clone();
    if let Some(name) = attrs.get(STANDARD_NAME_ATTR).and_then(AttrValue::as_text) {
        let name = format!("{name}_anomaly");
        attrs.insert(STANDARD_NAME_ATTR.to_string(), AttrValue::Text(name));
    }
    if let Some(name) = attrs.get(LONG_NAME_ATTR).and_then(AttrValue::as_text) {
        let name = format!("{name} anomaly");
        attrs.insert(LONG_NAME_ATTR.to_string(), AttrValue::Text(name));
    }
    append_history(&mut attrs, record);
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProvenanceRecord {
        ProvenanceRecord {
            operator: "mean".to_string(),
            dims: vec!["time".to_string()],
            policy: "skip".to_string(),
            ..Default::default()
        }
    }

    fn input() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert(UNITS_ATTR.into(), "kg m-2 s-1".into());
        attrs.insert(HISTORY_ATTR.into(), "created by model run 42".into());
        attrs
    }

    #[test]
    fn units_pass_through() {
        for operator in [Operator::Mean, Operator::Sum, Operator::Percentile(90.0)] {
            let attrs = reduced_attributes(&input(), operator, &["time".into()], false, &record());
            assert_eq!(attrs[UNITS_ATTR], AttrValue::from("kg m-2 s-1"));
        }
    }

    #[test]
    fn count_is_dimensionless() {
        let attrs = reduced_attributes(&input(), Operator::Count, &["time".into()], false, &record());
        assert_eq!(attrs[UNITS_ATTR], AttrValue::from("1"));
    }

    #[test]
    fn history_is_appended() {
        let first = reduced_attributes(&input(), Operator::Mean, &["time".into()], false, &record());
        let second = reduced_attributes(&first, Operator::Max, &["lat".into()], false, &record());
        let history = second[HISTORY_ATTR].as_text().unwrap();
        assert!(history.starts_with("created by model run 42\n"));
        assert_eq!(history.lines().count(), 3);
        assert_eq!(history_records(&second), vec![record(), record()]);
    }

    #[test]
    fn cell_methods_accumulate() {
        let first = reduced_attributes(&input(), Operator::Mean, &["time".into()], false, &record());
        let second = reduced_attributes(
            &first,
            Operator::Max,
            &["latitude".into(), "longitude".into()],
            true,
            &record(),
        );
        assert_eq!(
            second[CELL_METHODS_ATTR].as_text().unwrap(),
            "time: mean latitude: longitude: maximum (area-weighted)"
        );
    }

    #[test]
    fn anomaly_names() {
        let mut attrs = input();
        attrs.insert(STANDARD_NAME_ATTR.into(), "air_temperature".into());
        attrs.insert(LONG_NAME_ATTR.into(), "2 metre temperature".into());
        let attrs = anomaly_attributes(&attrs, &record());
        assert_eq!(attrs[STANDARD_NAME_ATTR].as_text(), Some("air_temperature_anomaly"));
        assert_eq!(attrs[LONG_NAME_ATTR].as_text(), Some("2 metre temperature anomaly"));
    }

    #[test]
    fn record_json_omits_empty_fields() {
        let json = record().to_json();
        assert!(!json.contains("parameter"));
        assert!(json.contains("\"operator\":\"mean\""));
    }
}
