//! In-memory aggregations over a node's records.
//!
//! Each aggregation runs independently: a failing one is recorded under its
//! `error_<op>_<field>` key and the others still run.

use std::collections::BTreeMap;

use fhir_plan::{record, AggregateOp, Aggregation};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{ExecutorError, ExecutorResult};

/// Timestamp read by `latest_per_subject` when no field is given.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "effectiveDateTime";

/// Reference elements that identify a record's subject, in lookup order.
pub const SUBJECT_FIELDS: &[&str] = &["subject", "patient"];

/// Applies aggregations in order and collects their outputs.
pub fn apply_aggregations(
    aggregations: &[Aggregation],
    records: &[Value],
) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for aggregation in aggregations {
        match aggregate(aggregation, records) {
            Ok(value) => {
                out.insert(aggregation.result_key(), value);
            }
            Err(err) => {
                debug!(op = aggregation.op.as_str(), error = %err, "executor.aggregate.failed");
                out.insert(aggregation.error_key(), Value::String(err.to_string()));
            }
        }
    }
    out
}

/// Computes a single aggregation.
///
/// # Errors
///
/// [`ExecutorError::Aggregation`] when a required field is missing or no
/// numeric value was found for a numeric operation.
pub fn aggregate(aggregation: &Aggregation, records: &[Value]) -> ExecutorResult<Value> {
    match aggregation.op {
        AggregateOp::LatestPerSubject => Ok(latest_per_subject(
            records,
            aggregation
                .field
                .as_deref()
                .unwrap_or(DEFAULT_TIMESTAMP_FIELD),
        )),
        AggregateOp::Count => Ok(match &aggregation.group_by {
            Some(group_by) => {
                let counts: Map<String, Value> = partition(records, group_by)
                    .into_iter()
                    .map(|(key, members)| (key, json!(members.len())))
                    .collect();
                Value::Object(counts)
            }
            None => json!(records.len()),
        }),
        AggregateOp::Group => {
            let path = aggregation
                .group_by
                .as_deref()
                .or(aggregation.field.as_deref())
                .ok_or_else(|| failure(aggregation, "requires a groupBy or field path"))?;
            let groups: Map<String, Value> = partition(records, path)
                .into_iter()
                .map(|(key, members)| (key, Value::Array(members.into_iter().cloned().collect())))
                .collect();
            Ok(Value::Object(groups))
        }
        AggregateOp::Average | AggregateOp::Sum | AggregateOp::Min | AggregateOp::Max => {
            let field = aggregation
                .field
                .as_deref()
                .ok_or_else(|| failure(aggregation, "requires a field"))?;

            match &aggregation.group_by {
                None => numeric(aggregation.op, &numbers(records.iter(), field))
                    .ok_or_else(|| failure(aggregation, &format!("no numeric values at '{}'", field))),
                Some(group_by) => {
                    let groups: Map<String, Value> = partition(records, group_by)
                        .into_iter()
                        .map(|(key, members)| {
                            let value = numeric(aggregation.op, &numbers(members.into_iter(), field))
                                .unwrap_or(Value::Null);
                            (key, value)
                        })
                        .collect();
                    Ok(Value::Object(groups))
                }
            }
        }
    }
}

fn failure(aggregation: &Aggregation, message: &str) -> ExecutorError {
    ExecutorError::Aggregation {
        op: aggregation.op.as_str().to_string(),
        message: message.to_string(),
    }
}

/// One record per subject: the one with the most recent timestamp.
///
/// Records without a subject are dropped. A record without a readable
/// timestamp only wins when its subject has no timestamped record.
fn latest_per_subject(records: &[Value], timestamp_field: &str) -> Value {
    let mut latest: IndexMap<&str, &Value> = IndexMap::new();

    for rec in records {
        let Some(subject) = SUBJECT_FIELDS
            .iter()
            .find_map(|f| record::reference_values(rec, f).into_iter().next())
        else {
            continue;
        };

        let candidate = record::timestamp_at_path(rec, timestamp_field);
        match latest.get(subject) {
            Some(current) => {
                let current_ts = record::timestamp_at_path(current, timestamp_field);
                if candidate.is_some() && candidate > current_ts {
                    latest.insert(subject, rec);
                }
            }
            None => {
                latest.insert(subject, rec);
            }
        }
    }

    Value::Array(latest.into_values().cloned().collect())
}

/// Partitions records by the first scalar value at `path`.
///
/// Records with no value at `path` belong to no group.
fn partition<'a>(records: &'a [Value], path: &str) -> BTreeMap<String, Vec<&'a Value>> {
    let mut groups: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for rec in records {
        let key = record::values_at_path(rec, path)
            .into_iter()
            .find_map(record::scalar_to_string);
        if let Some(key) = key {
            groups.entry(key).or_default().push(rec);
        }
    }
    groups
}

fn numbers<'a>(records: impl Iterator<Item = &'a Value>, field: &str) -> Vec<f64> {
    records
        .filter_map(|rec| record::first_at_path(rec, field))
        .filter_map(record::as_number)
        .collect()
}

fn numeric(op: AggregateOp, values: &[f64]) -> Option<Value> {
    if values.is_empty() {
        return None;
    }
    let result = match op {
        AggregateOp::Sum => values.iter().sum::<f64>(),
        AggregateOp::Average => values.iter().sum::<f64>() / values.len() as f64,
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        _ => return None,
    };
    Some(json!(result))
}
