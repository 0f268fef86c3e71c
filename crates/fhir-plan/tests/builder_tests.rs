//! Integration tests for plan construction.
//!
//! These cover determinism, topological validity and the include rewrite
//! against the default FHIR relationship table.

use std::sync::Arc;

use fhir_plan::{
    EdgeKind, FilterValue, PlanBuilder, PlanError, QueryPlan, QuerySpec, RelationshipTable,
    StageSpec,
};
use serde_json::json;

/// A five stage specification mixing embeddable and runtime dependencies.
fn care_pathway_spec() -> QuerySpec {
    QuerySpec::from_value(json!({
        "stages": {
            "patients": {
                "resourceType": "Patient",
                "filters": { "family": "smith", "birthdate": "lt1960-01-01" },
                "primary": true
            },
            "conditions": {
                "resourceType": "Condition",
                "filters": { "code": "44054006", "subject": "{patients.ids}" }
            },
            "labs": {
                "resourceType": "Observation",
                "filters": { "code": "4548-4", "subject": "{conditions.references}" },
                "aggregate": [{ "op": "latest_per_subject" }]
            },
            "procedures": {
                "resourceType": "Procedure",
                "filters": { "code": "{conditions.code.coding.code}" }
            },
            "reports": {
                "resourceType": "DiagnosticReport",
                "filters": { "conclusion-code": "{procedures.code.coding.code}" }
            }
        }
    }))
    .unwrap()
}

/// Asserts that every remaining dependency is scheduled before its dependent.
fn assert_topologically_valid(plan: &QueryPlan) {
    for node in &plan.nodes {
        let own = plan.position(&node.id).unwrap();
        for dep in &node.depends_on {
            if let Some(dep_pos) = plan.position(dep) {
                assert!(
                    dep_pos < own,
                    "{} must run before {} in {:?}",
                    dep,
                    node.id,
                    plan.execution_order
                );
            }
        }
    }
}

// ============================================================================
// Example scenarios
// ============================================================================

#[test]
fn test_single_condition_stage() {
    let spec = QuerySpec::from_value(json!({
        "stages": { "s1": { "resourceType": "Condition", "filters": {} } }
    }))
    .unwrap();
    let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

    assert_eq!(plan.nodes.len(), 1);
    assert_eq!(plan.execution_order, vec!["s1"]);
    assert_eq!(plan.edge_count(), 0);
}

#[test]
fn test_unembeddable_dependency_stays_reference() {
    let spec = QuerySpec::from_value(json!({
        "stages": {
            "s1": { "resourceType": "Observation" },
            "s2": { "resourceType": "Condition", "filters": { "subject": "{s1.ids}" } }
        }
    }))
    .unwrap();
    let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

    assert_eq!(plan.edge_kind("s1", "s2"), Some(EdgeKind::Reference));
    let s2 = plan.node("s2").unwrap();
    assert!(matches!(s2.filters.get("subject"), Some(FilterValue::Deferred(_))));
    assert_eq!(plan.execution_order, vec!["s1", "s2"]);
}

#[test]
fn test_embeddable_dependency_becomes_reverse_include() {
    // s1's type (Encounter) has a field referencing s2's type (Patient).
    let spec = QuerySpec::from_value(json!({
        "stages": {
            "s1": { "resourceType": "Encounter", "filters": { "status": "finished" } },
            "s2": { "resourceType": "Patient", "filters": { "_id": "{s1.references}" } }
        }
    }))
    .unwrap();
    let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

    let s1 = plan.node("s1").unwrap();
    assert!(s1.reverse_include_modifiers.contains("Patient:subject"));
    assert_eq!(plan.edge_kind("s1", "s2"), Some(EdgeKind::EmbeddedReverse));

    let s2 = plan.node("s2").unwrap();
    assert!(!s2.depends_on.contains("s1"));
    assert!(!s2.has_placeholders());
    assert!(plan.execution_order.contains(&"s2".to_string()));
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_build_is_deterministic() {
    let builder = PlanBuilder::with_default_table();
    let first = builder.build(&care_pathway_spec()).unwrap();

    for _ in 0..10 {
        let again = builder.build(&care_pathway_spec()).unwrap();
        assert_eq!(again, first);
        assert_eq!(again.to_string(), first.to_string());
    }
}

#[test]
fn test_care_pathway_is_topologically_valid() {
    let plan = PlanBuilder::with_default_table()
        .build(&care_pathway_spec())
        .unwrap();

    assert!(!plan.cycle_detected);
    assert_eq!(plan.execution_order.len(), 5);
    assert_topologically_valid(&plan);
}

#[test]
fn test_care_pathway_rewrites() {
    let plan = PlanBuilder::with_default_table()
        .build(&care_pathway_spec())
        .unwrap();

    // Condition.subject → Patient: forward include on the dependent.
    assert_eq!(
        plan.edge_kind("patients", "conditions"),
        Some(EdgeKind::EmbeddedForward)
    );
    assert!(plan
        .node("conditions")
        .unwrap()
        .include_modifiers
        .contains("Condition:subject"));

    // Neither Condition nor Observation references the other.
    assert_eq!(plan.edge_kind("conditions", "labs"), Some(EdgeKind::Reference));
    assert!(plan.node("labs").unwrap().depends_on.contains("conditions"));

    // Procedure ↔ Condition and DiagnosticReport ↔ Procedure are not in the table.
    assert_eq!(
        plan.edge_kind("conditions", "procedures"),
        Some(EdgeKind::Reference)
    );
    assert_eq!(
        plan.edge_kind("procedures", "reports"),
        Some(EdgeKind::Reference)
    );
}

#[test]
fn test_optimization_soundness_for_every_table_entry() {
    let table = RelationshipTable::fhir_default();
    let builder = PlanBuilder::new(Arc::new(table.clone()));

    for (source_type, dependent_type) in [
        ("Patient", "Observation"),
        ("Patient", "Condition"),
        ("Encounter", "Procedure"),
        ("Observation", "DiagnosticReport"),
        ("Practitioner", "MedicationRequest"),
        ("Organization", "Location"),
    ] {
        let spec = QuerySpec::staged([
            ("a", StageSpec::new(source_type)),
            (
                "b",
                StageSpec::new(dependent_type).with_filter("subject", "{a.ids}"),
            ),
        ]);
        let plan = builder.build(&spec).unwrap();
        let b = plan.node("b").unwrap();

        assert!(
            !b.depends_on.contains("a"),
            "{} → {} should be embedded",
            source_type,
            dependent_type
        );

        let kind = plan.edge_kind("a", "b").unwrap();
        match kind {
            EdgeKind::EmbeddedReverse => {
                let field = table.field_referencing(source_type, dependent_type).unwrap();
                let modifier = format!("{}:{}", dependent_type, field);
                assert!(plan.node("a").unwrap().reverse_include_modifiers.contains(&modifier));
            }
            EdgeKind::EmbeddedForward => {
                let field = table.field_referencing(dependent_type, source_type).unwrap();
                let modifier = format!("{}:{}", dependent_type, field);
                assert!(b.include_modifiers.contains(&modifier));
            }
            other => panic!("unexpected edge kind {:?}", other),
        }
    }
}

#[test]
fn test_declared_modifiers_are_kept() {
    let spec = QuerySpec::from_value(json!({
        "resourceType": "MedicationRequest",
        "filters": { "status": "active", "_count": 20 },
        "include": ["MedicationRequest:medication"],
        "revinclude": ["Provenance:target"],
        "fields": ["id", "medicationCodeableConcept"]
    }))
    .unwrap();
    let plan = PlanBuilder::with_default_table().build(&spec).unwrap();
    let params = plan.node("main").unwrap().to_params();

    assert_eq!(params["status"], "active");
    assert_eq!(params["_count"], "20");
    assert_eq!(params["_include"], "MedicationRequest:medication");
    assert_eq!(params["_revinclude"], "Provenance:target");
    assert_eq!(params["_elements"], "id,medicationCodeableConcept");
}

#[test]
fn test_malformed_stage_rejected_before_graph() {
    let spec = QuerySpec::from_value(json!({
        "stages": {
            "ok": { "resourceType": "Patient" },
            "broken": { "filters": { "subject": "{ok.ids}" } }
        }
    }))
    .unwrap();
    let err = PlanBuilder::with_default_table().build(&spec).unwrap_err();
    assert_eq!(err.to_string(), "stage 'broken' has no resourceType");
    assert!(matches!(err, PlanError::MissingResourceType { .. }));
}

#[test]
fn test_invalid_json_rejected() {
    let err = QuerySpec::from_json("{\"stages\": ").unwrap_err();
    assert!(matches!(err, PlanError::InvalidSpecification(_)));
}
