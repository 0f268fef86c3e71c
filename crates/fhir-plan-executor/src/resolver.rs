//! Runtime substitution of deferred filter values.

use std::collections::BTreeMap;

use fhir_plan::{record, Placeholder, PlaceholderField, QueryNode};
use indexmap::{IndexMap, IndexSet};

use crate::error::{ExecutorError, ExecutorResult};
use crate::result::QueryResult;

/// Resolves every deferred filter of `node` against earlier results.
///
/// Returns parameter name → comma-joined value. A placeholder whose source
/// produced no usable value is left out of the map, so the parameter is
/// omitted rather than widened.
///
/// # Errors
///
/// [`ExecutorError::UnresolvedDependency`] when a placeholder names a node
/// with no result (unknown, self-referencing or scheduled later by a cycle
/// fallback).
pub fn resolve_filters(
    node: &QueryNode,
    results: &IndexMap<String, QueryResult>,
) -> ExecutorResult<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();

    for (name, placeholder) in node.placeholders() {
        let source = results
            .get(&placeholder.source)
            .ok_or_else(|| ExecutorError::UnresolvedDependency {
                node: node.id.clone(),
                source_id: placeholder.source.clone(),
            })?;

        let values = placeholder_values(placeholder, source);
        if !values.is_empty() {
            resolved.insert(name.to_string(), values.into_iter().collect::<Vec<_>>().join(","));
        }
    }

    Ok(resolved)
}

/// Distinct values a placeholder extracts from a result, in record order.
pub fn placeholder_values(placeholder: &Placeholder, source: &QueryResult) -> IndexSet<String> {
    let mut values = IndexSet::new();

    for rec in source.primary_records() {
        match &placeholder.field {
            PlaceholderField::Ids | PlaceholderField::Subjects => {
                if let Some(id) = record::resource_id(rec).filter(|id| !id.is_empty()) {
                    values.insert(format!("{}/{}", source.resource_type, id));
                }
            }
            PlaceholderField::References { sub_field } => {
                values.extend(
                    record::reference_values(rec, sub_field)
                        .into_iter()
                        .filter(|r| !r.is_empty())
                        .map(str::to_string),
                );
            }
            PlaceholderField::Path(path) => {
                values.extend(
                    record::values_at_path(rec, path)
                        .into_iter()
                        .filter_map(record::scalar_to_string),
                );
            }
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir_plan::FilterValue;
    use serde_json::json;

    fn observations() -> QueryResult {
        let mut result = QueryResult::new("s1", "Observation");
        result.records = vec![
            json!({
                "resourceType": "Observation", "id": "a",
                "subject": { "reference": "Patient/p1" },
                "code": { "coding": [{ "code": "8867-4" }] }
            }),
            json!({
                "resourceType": "Observation", "id": "b",
                "subject": { "reference": "Patient/p1" },
                "code": { "coding": [{ "code": "9279-1" }] }
            }),
            json!({ "resourceType": "Patient", "id": "p1" }),
        ];
        result
    }

    fn dependent(filter: &str) -> QueryNode {
        let mut node = QueryNode::new("s2", "Condition");
        node.filters
            .insert("subject".to_string(), FilterValue::from(filter));
        node
    }

    fn results_with(result: QueryResult) -> IndexMap<String, QueryResult> {
        let mut results = IndexMap::new();
        results.insert(result.node_id.clone(), result);
        results
    }

    #[test]
    fn test_resolve_ids() {
        let resolved = resolve_filters(&dependent("{s1.ids}"), &results_with(observations())).unwrap();
        assert_eq!(resolved["subject"], "Observation/a,Observation/b");
    }

    #[test]
    fn test_resolve_references_deduplicated() {
        let resolved =
            resolve_filters(&dependent("{s1.references}"), &results_with(observations())).unwrap();
        assert_eq!(resolved["subject"], "Patient/p1");
    }

    #[test]
    fn test_resolve_dotted_path() {
        let resolved = resolve_filters(
            &dependent("{s1.code.coding.code}"),
            &results_with(observations()),
        )
        .unwrap();
        assert_eq!(resolved["subject"], "8867-4,9279-1");
    }

    #[test]
    fn test_empty_source_omits_parameter() {
        let resolved = resolve_filters(
            &dependent("{s1.ids}"),
            &results_with(QueryResult::new("s1", "Observation")),
        )
        .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_missing_source_is_unresolved() {
        let err = resolve_filters(&dependent("{ghost.ids}"), &IndexMap::new()).unwrap_err();
        assert_eq!(
            err,
            ExecutorError::UnresolvedDependency {
                node: "s2".to_string(),
                source_id: "ghost".to_string(),
            }
        );
    }
}
