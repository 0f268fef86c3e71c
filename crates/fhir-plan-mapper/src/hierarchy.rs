//! Parent-child hierarchy detection.

use std::collections::{HashMap, HashSet};

use fhir_plan::record;
use indexmap::IndexMap;
use tracing::debug;

use crate::mapper::{fields, TypedRecord};
use crate::types::Hierarchy;

/// A record's (resource type, id).
type NodeKey = (String, String);

/// Detects one hierarchy per (member type, parent field) pair.
///
/// Any record carrying a parent field belongs to a hierarchy, whatever type
/// the parent is. Chains are followed by (type, id) across the whole result
/// set, so an Observation that is `partOf` a Procedure continues through that
/// Procedure's own parent. An untyped parent reference takes its type from
/// the id index, falling back to the child's type. Depth is the number of
/// parent links followed until the chain leaves the result set; a chain that
/// revisits a record marks the hierarchy cyclic and stops there.
pub fn detect_hierarchies(records: &[TypedRecord<'_>]) -> Vec<Hierarchy> {
    let id_index: HashMap<&str, &str> = records
        .iter()
        .filter_map(|r| r.id.map(|id| (id, r.resource_type)))
        .collect();

    let mut hierarchies = Vec::new();
    for field in fields::PARENT_FIELDS {
        let mut parents: HashMap<NodeKey, NodeKey> = HashMap::new();
        let mut members: IndexMap<&str, Vec<NodeKey>> = IndexMap::new();

        for rec in records {
            let Some(id) = rec.id else {
                continue;
            };
            let Some(parent) = record::reference_values(rec.value, field)
                .into_iter()
                .find_map(record::parse_reference)
            else {
                continue;
            };

            let parent_type = parent
                .resource_type
                .or_else(|| id_index.get(parent.id.as_str()).map(|t| t.to_string()))
                .unwrap_or_else(|| rec.resource_type.to_string());
            let key = (rec.resource_type.to_string(), id.to_string());
            if parents.insert(key.clone(), (parent_type, parent.id)).is_none() {
                members.entry(rec.resource_type).or_default().push(key);
            }
        }

        hierarchies.extend(
            members
                .into_iter()
                .map(|(resource_type, keys)| trace(resource_type, field, &keys, &parents)),
        );
    }
    hierarchies
}

fn trace(
    resource_type: &str,
    field: &str,
    members: &[NodeKey],
    parents: &HashMap<NodeKey, NodeKey>,
) -> Hierarchy {
    let mut roots: HashSet<&NodeKey> = HashSet::new();
    let mut max_depth = 0;
    let mut cyclic = false;

    for member in members {
        let mut visited: HashSet<&NodeKey> = HashSet::from([member]);
        let mut current = member;
        let mut depth = 0;

        while let Some(parent) = parents.get(current) {
            depth += 1;
            if !visited.insert(parent) {
                debug!(resource_type, field, member = %member.1, "mapper.hierarchy.cycle");
                cyclic = true;
                break;
            }
            current = parent;
        }

        if !parents.contains_key(current) {
            roots.insert(current);
        }
        max_depth = max_depth.max(depth);
    }

    Hierarchy {
        resource_type: resource_type.to_string(),
        field: field.to_string(),
        members: members.len(),
        roots: roots.len(),
        max_depth,
        cyclic,
    }
}
