//! Helpers for reading opaque FHIR records held as JSON.
//!
//! Records are never deserialized into typed resources; every consumer reads
//! them through these lenient accessors, and anything unreadable yields
//! nothing instead of an error.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Returns the record's `resourceType`.
pub fn resource_type(record: &Value) -> Option<&str> {
    record.get("resourceType").and_then(Value::as_str)
}

/// Returns the record's logical id.
pub fn resource_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

/// Collects every value found at a dotted path.
///
/// Arrays met along the way are flattened, so `code.coding.code` visits every
/// coding. A numeric segment indexes into an array instead.
pub fn values_at_path<'a>(record: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = vec![record];

    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => next.extend(items.get(index)),
                    Err(_) => next.extend(items.iter().filter_map(|item| item.get(segment))),
                },
                _ => {}
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }

    current
        .into_iter()
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

/// Returns the first value at a dotted path.
pub fn first_at_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    values_at_path(record, path).into_iter().next()
}

/// Renders a scalar JSON value as a search-parameter string.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads a value as a number; numeric strings are accepted.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reference strings held by a reference element (single or repeated).
pub fn reference_values<'a>(record: &'a Value, field: &str) -> Vec<&'a str> {
    values_at_path(record, field)
        .into_iter()
        .filter_map(|v| v.get("reference").and_then(Value::as_str))
        .collect()
}

/// The target of a reference, as far as it can be read from the string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTarget {
    /// Target resource type, when the reference names one.
    pub resource_type: Option<String>,
    /// Target logical id.
    pub id: String,
}

/// Splits a reference string into type and id.
///
/// Handles relative (`Patient/1`), absolute (`https://host/fhir/Patient/1`),
/// versioned (`Patient/1/_history/2`) and `urn:uuid:` references. Contained
/// references (`#x`) resolve to nothing.
pub fn parse_reference(reference: &str) -> Option<ReferenceTarget> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }

    if let Some(id) = reference
        .strip_prefix("urn:uuid:")
        .or_else(|| reference.strip_prefix("urn:oid:"))
    {
        return Some(ReferenceTarget {
            resource_type: None,
            id: id.to_string(),
        });
    }

    let mut parts: Vec<&str> = reference.split('/').filter(|p| !p.is_empty()).collect();
    if let Some(pos) = parts.iter().position(|p| *p == "_history") {
        parts.truncate(pos);
    }

    match parts.as_slice() {
        [] => None,
        [id] => Some(ReferenceTarget {
            resource_type: None,
            id: id.to_string(),
        }),
        [.., ty, id] => Some(ReferenceTarget {
            resource_type: Some(ty.to_string()),
            id: id.to_string(),
        }),
    }
}

/// Parses a FHIR date, dateTime or instant.
///
/// Partial dates (`2024`, `2024-03`) start at the first instant of the
/// period; values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }

    let date = match raw.len() {
        4 => raw
            .parse::<i32>()
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
        7 => NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d").ok(),
        _ => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
    }?;

    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Parses the timestamp at a dotted path.
pub fn timestamp_at_path(record: &Value, path: &str) -> Option<DateTime<FixedOffset>> {
    first_at_path(record, path)
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}
