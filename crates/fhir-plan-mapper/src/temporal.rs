//! Temporal shape of each resource type.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use fhir_plan::record;
use indexmap::IndexMap;

use crate::mapper::{fields, MapperConfig, TypedRecord};
use crate::types::TemporalInfo;

/// Samples each type's first records for date fields.
///
/// Only types where some sampled record carries a readable date get an
/// entry. `record_count` counts every record of the type, not just the
/// sample.
pub fn analyze_temporal(
    records: &[TypedRecord<'_>],
    config: &MapperConfig,
) -> BTreeMap<String, TemporalInfo> {
    let mut by_type: IndexMap<&str, Vec<&TypedRecord<'_>>> = IndexMap::new();
    for rec in records {
        by_type.entry(rec.resource_type).or_default().push(rec);
    }

    by_type
        .into_iter()
        .filter_map(|(resource_type, group)| {
            analyze_type(&group, config).map(|info| (resource_type.to_string(), info))
        })
        .collect()
}

fn analyze_type(group: &[&TypedRecord<'_>], config: &MapperConfig) -> Option<TemporalInfo> {
    let mut date_fields = Vec::new();
    let mut range: Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> = None;

    for field in fields::DATE_FIELDS {
        let mut seen = false;
        for rec in group.iter().take(config.sample_size) {
            let Some(ts) = record::timestamp_at_path(rec.value, field) else {
                continue;
            };
            seen = true;
            range = Some(match range {
                Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
                None => (ts, ts),
            });
        }
        if seen {
            date_fields.push(field.to_string());
        }
    }

    let (earliest, latest) = range?;
    let record_count = group.len();

    Some(TemporalInfo {
        date_fields,
        earliest: Some(earliest.to_rfc3339()),
        latest: Some(latest.to_rfc3339()),
        record_count,
        has_time_series: record_count > config.time_series_threshold,
        span_days: Some((latest - earliest).num_days()),
    })
}
