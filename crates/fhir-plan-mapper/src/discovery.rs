//! Reference relationship discovery.

use std::collections::{HashMap, HashSet};

use fhir_plan::record;
use indexmap::{IndexMap, IndexSet};

use crate::mapper::{fields, TypedRecord};
use crate::types::{Cardinality, DataRelationship};

/// Key of an accumulating relationship: (source type, target type, field).
type RelationshipKey = (String, String, String);

/// Discovers relationships by reading every known reference element.
///
/// Reference targets are typed from the reference itself (`Type/id`) or,
/// failing that, from the id → type index of all records. References that
/// cannot be typed, and records without an id, contribute nothing.
pub fn discover_relationships(records: &[TypedRecord<'_>]) -> Vec<DataRelationship> {
    let id_index: HashMap<&str, &str> = records
        .iter()
        .filter_map(|r| r.id.map(|id| (id, r.resource_type)))
        .collect();

    let mut found: IndexMap<RelationshipKey, IndexSet<(String, String)>> = IndexMap::new();

    for rec in records {
        let Some(source_id) = rec.id else {
            continue;
        };
        for field in fields::REFERENCE_FIELDS {
            for reference in record::reference_values(rec.value, field) {
                let Some(target) = record::parse_reference(reference) else {
                    continue;
                };
                let target_type = match target.resource_type.as_deref() {
                    Some(t) => t,
                    None => match id_index.get(target.id.as_str()) {
                        Some(t) => *t,
                        None => continue,
                    },
                };

                found
                    .entry((
                        rec.resource_type.to_string(),
                        target_type.to_string(),
                        field.to_string(),
                    ))
                    .or_default()
                    .insert((source_id.to_string(), target.id.clone()));
            }
        }
    }

    found
        .into_iter()
        .map(|((source_type, target_type, kind), pairs)| {
            let instances: Vec<(String, String)> = pairs.into_iter().collect();
            DataRelationship {
                source_type,
                target_type,
                kind,
                cardinality: cardinality(&instances),
                instances,
            }
        })
        .collect()
}

/// Derives cardinality from instance pairs.
pub fn cardinality(instances: &[(String, String)]) -> Cardinality {
    let mut targets_per_source: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut sources_per_target: HashMap<&str, HashSet<&str>> = HashMap::new();
    for (source, target) in instances {
        targets_per_source
            .entry(source)
            .or_default()
            .insert(target);
        sources_per_target
            .entry(target)
            .or_default()
            .insert(source);
    }

    let source_fans_out = targets_per_source.values().any(|t| t.len() > 1);
    let target_fans_out = sources_per_target.values().any(|s| s.len() > 1);
    match (source_fans_out, target_fans_out) {
        (true, true) => Cardinality::ManyToMany,
        (false, false) => Cardinality::OneToOne,
        _ => Cardinality::OneToMany,
    }
}
