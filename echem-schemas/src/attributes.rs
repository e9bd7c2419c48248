//! Reflection over serialized records.
//!
//! Records are plain structs, so the attribute list is recovered by walking their JSON form.
//! `{value, unit}` objects are reported as quantities, reference-shaped objects as references,
//! and ISO timestamps as timestamps.

use crate::archive::Record;
use chrono::NaiveDateTime;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Number,
    /// A scalar with a unit.
    Quantity,
    /// An array of numbers with a unit.
    Signal,
    Timestamp,
    Text,
    Bool,
    /// A list of nested records or plain values.
    Sequence,
    Reference,
    /// Declared but currently null.
    Unset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Dotted path, with `[i]` for sequence elements, e.g. `details.cycles[0].voltage`.
    pub path: String,
    pub kind: AttributeKind,
    pub unit: Option<String>,
    pub len: Option<usize>,
}

const REFERENCE_KEYS: [&str; 4] = ["lab_id", "upload_id", "entry_id", "display_name"];

/// Lists every attribute of `record` with its kind and unit.
pub fn list_attributes(record: &Record) -> Vec<Attribute> {
    let mut out = Vec::new();
    if let Ok(value) = serde_json::to_value(record) {
        walk("", &value, &mut out);
    }
    out
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn push(out: &mut Vec<Attribute>, path: &str, kind: AttributeKind) {
    out.push(Attribute {
        path: path.to_string(),
        kind,
        unit: None,
        len: None,
    });
}

fn is_reference(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty()
        && map.keys().all(|k| REFERENCE_KEYS.contains(&k.as_str()))
        && map.values().all(|v| v.is_string())
}

fn walk(path: &str, value: &Value, out: &mut Vec<Attribute>) {
    match value {
        Value::Null => push(out, path, AttributeKind::Unset),
        Value::Bool(_) => push(out, path, AttributeKind::Bool),
        Value::Number(_) => push(out, path, AttributeKind::Number),
        Value::String(s) => {
            let kind = if s.parse::<NaiveDateTime>().is_ok() {
                AttributeKind::Timestamp
            } else {
                AttributeKind::Text
            };
            push(out, path, kind);
        }
        Value::Array(items) => {
            out.push(Attribute {
                path: path.to_string(),
                kind: AttributeKind::Sequence,
                unit: None,
                len: Some(items.len()),
            });
            if items.iter().any(|v| v.is_object()) {
                for (i, item) in items.iter().enumerate() {
                    walk(&format!("{path}[{i}]"), item, out);
                }
            }
        }
        Value::Object(map) => {
            if map.len() == 2 {
                if let (Some(inner), Some(Value::String(unit))) = (map.get("value"), map.get("unit")) {
                    let (kind, len) = match inner {
                        Value::Array(items) => (AttributeKind::Signal, Some(items.len())),
                        _ => (AttributeKind::Quantity, None),
                    };
                    out.push(Attribute {
                        path: path.to_string(),
                        kind,
                        unit: Some(unit.clone()),
                        len,
                    });
                    return;
                }
            }
            if !path.is_empty() && is_reference(map) {
                push(out, path, AttributeKind::Reference);
                return;
            }
            for (key, child) in map {
                walk(&join(path, key), child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        measurement::{Measurement, MeasurementKind},
        quantity::Quantity,
        reference::EntityReference,
        voltammetry::{CvProperties, Voltammetry, VoltammetryCycle},
    };

    #[test]
    fn test_lists_units_and_references() {
        let mut cv = Voltammetry::<CvProperties>::default();
        cv.sample_area = Some(Quantity::new(0.196, "cm^2"));
        cv.curve = Some(VoltammetryCycle {
            voltage: Some(Quantity::new(vec![0.1, 0.2, 0.3], "V")),
            ..VoltammetryCycle::default()
        });
        let mut measurement = Measurement::from_file("CV.DTA", MeasurementKind::CyclicVoltammetry(cv));
        measurement
            .header
            .samples
            .push(EntityReference::from_lab_id("AbCd_230314_0001"));

        let attributes = list_attributes(&Record::Measurement(measurement));
        let find = |path: &str| attributes.iter().find(|a| a.path == path).cloned();

        let area = find("details.sample_area").unwrap();
        assert_eq!(area.kind, AttributeKind::Quantity);
        assert_eq!(area.unit.as_deref(), Some("cm^2"));

        let voltage = find("details.curve.voltage").unwrap();
        assert_eq!(voltage.kind, AttributeKind::Signal);
        assert_eq!(voltage.len, Some(3));

        assert_eq!(find("header.samples[0]").unwrap().kind, AttributeKind::Reference);
        assert_eq!(find("header.datetime").unwrap().kind, AttributeKind::Unset);
        assert_eq!(find("m_def").unwrap().kind, AttributeKind::Text);
    }
}
