//! Primary entity, complexity scoring and UI pattern selection.

use std::collections::BTreeMap;

use fhir_plan::QuerySpec;

use crate::mapper::weights;
use crate::types::UiPattern;

/// Chooses the main subject of a result set.
///
/// The type marked primary in the specification wins, then the subject type
/// when it has records, then the type with the most records (ties go to the
/// alphabetically first type).
pub fn primary_entity(
    spec: &QuerySpec,
    resource_types: &BTreeMap<String, usize>,
    subject_type: &str,
) -> Option<String> {
    if let Some(primary) = spec.primary_resource_type() {
        return Some(primary.to_string());
    }
    if resource_types.get(subject_type).is_some_and(|c| *c > 0) {
        return Some(subject_type.to_string());
    }

    let mut best: Option<(&String, usize)> = None;
    for (ty, count) in resource_types {
        if *count > 0 && best.map_or(true, |(_, c)| *count > c) {
            best = Some((ty, *count));
        }
    }
    best.map(|(ty, _)| ty.clone())
}

/// Weighted complexity score.
pub fn complexity_score(
    relationships: usize,
    hierarchies: usize,
    aggregations_present: bool,
    populated_types: usize,
) -> u32 {
    let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);

    let mut score = weights::RELATIONSHIP.saturating_mul(count(relationships));
    score = score.saturating_add(weights::HIERARCHY.saturating_mul(count(hierarchies)));
    if aggregations_present {
        score = score.saturating_add(weights::AGGREGATION);
    }
    score.saturating_add(
        weights::EXTRA_RESOURCE_TYPE.saturating_mul(count(populated_types.saturating_sub(1))),
    )
}

/// Facts the pattern decision table looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternInputs {
    /// Distinct records across all results.
    pub total_records: usize,
    /// Resource types with at least one record.
    pub populated_types: usize,
    /// Whether any aggregation was declared or computed.
    pub aggregations_present: bool,
    /// Whether a hierarchy was detected.
    pub has_hierarchies: bool,
    /// Whether some type has a time-series shape.
    pub has_time_series: bool,
    /// Whether the primary entity is the subject type.
    pub primary_is_subject: bool,
}

/// Picks a UI pattern; the first matching row wins.
pub fn suggest_pattern(inputs: &PatternInputs) -> UiPattern {
    if inputs.total_records == 0 {
        UiPattern::EmptyState
    } else if inputs.aggregations_present {
        UiPattern::Dashboard
    } else if inputs.has_hierarchies {
        UiPattern::TreeView
    } else if inputs.has_time_series {
        UiPattern::Timeline
    } else if inputs.total_records == 1 {
        UiPattern::DetailView
    } else if inputs.primary_is_subject && inputs.populated_types > 1 {
        UiPattern::PatientSummary
    } else if inputs.total_records > weights::DATA_TABLE_THRESHOLD {
        UiPattern::DataTable
    } else {
        UiPattern::ListView
    }
}
