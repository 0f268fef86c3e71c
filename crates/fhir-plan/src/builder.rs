//! Plan builder: specification → scheduled [`QueryPlan`].
//!
//! Building happens in three passes, all pure:
//!
//! 1. **Nodes** - one [`QueryNode`] per stage; `{stage.field}` filters become
//!    deferred values and register a `feeds-data` edge from their source.
//! 2. **Include rewrite** - every dependency edge that the relationship table
//!    can express as `_revinclude` / `_include` is folded into a single
//!    request and removed from the dependency graph.
//! 3. **Scheduling** - Kahn's algorithm over what is left, ties broken by
//!    declaration order. A surviving cycle falls back to declaration order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::{PlanError, PlanResult};
use crate::filter::FilterValue;
use crate::model::{EdgeKind, PlanEdge, QueryNode, QueryPlan};
use crate::relationships::RelationshipTable;
use crate::spec::{AggregateSpec, QuerySpec};

/// Outcome of classifying one dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rewrite {
    /// `_revinclude` added to the dependency.
    Reverse(String),
    /// `_include` added to the dependent.
    Forward(String),
    /// No embedding possible; resolved at execution time.
    Keep,
}

/// Turns query specifications into scheduled plans.
///
/// # Example
///
/// ```rust
/// use fhir_plan::{PlanBuilder, QuerySpec, StageSpec};
///
/// let spec = QuerySpec::staged([("conditions", StageSpec::new("Condition"))]);
/// let plan = PlanBuilder::with_default_table().build(&spec).unwrap();
///
/// assert_eq!(plan.execution_order, vec!["conditions".to_string()]);
/// assert_eq!(plan.edge_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    table: Arc<RelationshipTable>,
}

impl PlanBuilder {
    /// Creates a builder that consults the given relationship table.
    pub fn new(table: Arc<RelationshipTable>) -> Self {
        Self { table }
    }

    /// Creates a builder over [`RelationshipTable::fhir_default`].
    pub fn with_default_table() -> Self {
        Self::new(Arc::new(RelationshipTable::fhir_default()))
    }

    /// Returns the relationship table.
    pub fn table(&self) -> &RelationshipTable {
        &self.table
    }

    /// Builds a plan from a specification.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::EmptySpecification`] for a specification without
    /// stages and [`PlanError::MissingResourceType`] for a stage without a
    /// resource type. Nothing else fails: cycles degrade to declaration order.
    pub fn build(&self, spec: &QuerySpec) -> PlanResult<QueryPlan> {
        let (mut nodes, mut relationships) = Self::create_nodes(spec)?;
        self.optimize(&mut nodes, &mut relationships);

        let (execution_order, cycle_detected) = match Self::schedule(&nodes) {
            Some(order) => (order, false),
            None => {
                let unresolved: Vec<&str> = nodes
                    .iter()
                    .filter(|n| !n.depends_on.is_empty())
                    .map(|n| n.id.as_str())
                    .collect();
                warn!(?unresolved, "plan.schedule.cycle");
                (nodes.iter().map(|n| n.id.clone()).collect(), true)
            }
        };

        let plan = QueryPlan {
            nodes,
            execution_order,
            relationships,
            cycle_detected,
        };
        debug!(
            nodes = plan.nodes.len(),
            edges = plan.edge_count(),
            cycle = plan.cycle_detected,
            "plan.build"
        );
        Ok(plan)
    }

    /// Pass 1: validates stages and creates nodes and `feeds-data` edges.
    fn create_nodes(
        spec: &QuerySpec,
    ) -> PlanResult<(Vec<QueryNode>, IndexMap<String, Vec<PlanEdge>>)> {
        let stages = spec.stages();
        if stages.is_empty() {
            return Err(PlanError::EmptySpecification);
        }

        // Reject malformed stages before any graph is built.
        for (id, stage) in &stages {
            if stage.resource_type.as_deref().map_or(true, str::is_empty) {
                return Err(PlanError::MissingResourceType {
                    stage: id.to_string(),
                });
            }
        }

        let mut nodes = Vec::with_capacity(stages.len());
        let mut relationships: IndexMap<String, Vec<PlanEdge>> = IndexMap::new();

        for (id, stage) in &stages {
            let mut node = QueryNode::new(*id, stage.resource_type.clone().unwrap_or_default());

            for (name, raw) in &stage.filters {
                let value = FilterValue::from_json(raw);
                if let Some(placeholder) = value.placeholder() {
                    let source = placeholder.source.clone();
                    if !stages.iter().any(|(other, _)| *other == source) {
                        warn!(node = %id, %source, "plan.dependency.unknown");
                    } else {
                        add_edge(&mut relationships, &source, id, EdgeKind::FeedsData);
                    }
                    node.depends_on.insert(source);
                }
                node.filters.insert(name.clone(), value);
            }

            node.include_modifiers.extend(stage.include.iter().cloned());
            node.reverse_include_modifiers
                .extend(stage.revinclude.iter().cloned());
            node.fields = stage.fields.clone();
            node.aggregations = stage
                .aggregate
                .clone()
                .map(AggregateSpec::into_vec)
                .unwrap_or_default();

            nodes.push(node);
        }

        Ok((nodes, relationships))
    }

    /// Pass 2: folds embeddable dependency edges into include modifiers.
    fn optimize(&self, nodes: &mut [QueryNode], relationships: &mut IndexMap<String, Vec<PlanEdge>>) {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        // Classify first, then apply, so every decision sees the declared graph.
        let mut decisions = Vec::new();
        for (b_idx, dependent) in nodes.iter().enumerate() {
            for source in &dependent.depends_on {
                let Some(&a_idx) = index.get(source) else {
                    continue;
                };
                if a_idx == b_idx {
                    continue;
                }
                let rewrite = self.classify(&nodes[a_idx].resource_type, &dependent.resource_type);
                decisions.push((a_idx, b_idx, rewrite));
            }
        }

        for (a_idx, b_idx, rewrite) in decisions {
            let source = nodes[a_idx].id.clone();
            let target = nodes[b_idx].id.clone();

            let kind = match rewrite {
                Rewrite::Reverse(modifier) => {
                    nodes[a_idx].reverse_include_modifiers.insert(modifier);
                    EdgeKind::EmbeddedReverse
                }
                Rewrite::Forward(modifier) => {
                    nodes[b_idx].include_modifiers.insert(modifier);
                    EdgeKind::EmbeddedForward
                }
                Rewrite::Keep => EdgeKind::Reference,
            };

            if kind != EdgeKind::Reference {
                let dependent = &mut nodes[b_idx];
                dependent.depends_on.remove(&source);
                dependent.filters.retain(|_, value| {
                    value.placeholder().map_or(true, |p| p.source != source)
                });
            }

            debug!(%source, %target, %kind, "plan.rewrite");
            add_edge(relationships, &source, &target, kind);
        }
    }

    /// Decides how the edge "a node of `dependent_type` depends on a node of
    /// `source_type`" is executed.
    fn classify(&self, source_type: &str, dependent_type: &str) -> Rewrite {
        if let Some(field) = self.table.field_referencing(source_type, dependent_type) {
            return Rewrite::Reverse(format!("{}:{}", dependent_type, field));
        }
        if let Some(field) = self.table.field_referencing(dependent_type, source_type) {
            return Rewrite::Forward(format!("{}:{}", dependent_type, field));
        }
        Rewrite::Keep
    }

    /// Pass 3: topological order by Kahn's algorithm.
    ///
    /// Zero in-degree nodes are taken in declaration order, and nodes released
    /// by the same step are queued in declaration order too. Dependencies on
    /// unknown node ids do not count. Returns `None` when a cycle remains.
    pub fn schedule(nodes: &[QueryNode]) -> Option<Vec<String>> {
        let known: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.depends_on {
                if let Some(&d) = known.get(dep.as_str()) {
                    in_degree[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(current) = queue.pop_front() {
            order.push(nodes[current].id.clone());
            for &next in &dependents[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        (order.len() == nodes.len()).then_some(order)
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::with_default_table()
    }
}

/// Inserts or relabels the edge `source → target`.
fn add_edge(
    relationships: &mut IndexMap<String, Vec<PlanEdge>>,
    source: &str,
    target: &str,
    kind: EdgeKind,
) {
    let edges = relationships.entry(source.to_string()).or_default();
    match edges.iter_mut().find(|e| e.target == target) {
        Some(edge) => edge.kind = kind,
        None => edges.push(PlanEdge {
            target: target.to_string(),
            kind,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::StageSpec;

    fn empty_table_builder() -> PlanBuilder {
        PlanBuilder::new(Arc::new(RelationshipTable::default()))
    }

    #[test]
    fn test_single_stage_without_dependencies() {
        let spec = QuerySpec::staged([("s1", StageSpec::new("Condition"))]);
        let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

        assert_eq!(plan.nodes.len(), 1);
        assert_eq!(plan.execution_order, vec!["s1".to_string()]);
        assert_eq!(plan.edge_count(), 0);
        assert!(!plan.cycle_detected);
    }

    #[test]
    fn test_missing_resource_type_rejected() {
        let spec = QuerySpec::staged([("s1", StageSpec::default())]);
        let err = PlanBuilder::default().build(&spec).unwrap_err();
        assert!(matches!(err, PlanError::MissingResourceType { stage } if stage == "s1"));
    }

    #[test]
    fn test_empty_specification_rejected() {
        let spec = QuerySpec::staged(Vec::<(String, StageSpec)>::new());
        let err = PlanBuilder::default().build(&spec).unwrap_err();
        assert!(matches!(err, PlanError::EmptySpecification));
    }

    #[test]
    fn test_placeholder_registers_dependency_and_reference_edge() {
        let spec = QuerySpec::staged([
            ("s1", StageSpec::new("Observation")),
            ("s2", StageSpec::new("Condition").with_filter("subject", "{s1.ids}")),
        ]);
        let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

        let s2 = plan.node("s2").unwrap();
        assert!(s2.depends_on.contains("s1"));
        assert!(s2.has_placeholders());
        assert_eq!(plan.edge_kind("s1", "s2"), Some(EdgeKind::Reference));
        assert_eq!(plan.execution_order, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_reverse_include_rewrite() {
        // The dependency's type references the dependent's type.
        let table = RelationshipTable::builder()
            .reference("Encounter", "subject", "Patient")
            .build();
        let spec = QuerySpec::staged([
            ("s1", StageSpec::new("Encounter")),
            ("s2", StageSpec::new("Patient").with_filter("_id", "{s1.references}")),
        ]);
        let plan = PlanBuilder::new(Arc::new(table)).build(&spec).unwrap();

        let s1 = plan.node("s1").unwrap();
        let s2 = plan.node("s2").unwrap();
        assert!(s1.reverse_include_modifiers.contains("Patient:subject"));
        assert!(s2.depends_on.is_empty());
        assert!(!s2.has_placeholders());
        assert_eq!(plan.edge_kind("s1", "s2"), Some(EdgeKind::EmbeddedReverse));
        assert_eq!(plan.execution_order.len(), 2);
    }

    #[test]
    fn test_forward_include_rewrite() {
        let spec = QuerySpec::staged([
            ("pts", StageSpec::new("Patient").with_filter("name", "smith")),
            ("obs", StageSpec::new("Observation").with_filter("subject", "{pts.ids}")),
        ]);
        let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

        let obs = plan.node("obs").unwrap();
        assert!(obs.include_modifiers.contains("Observation:subject"));
        assert!(obs.depends_on.is_empty());
        assert!(obs.filters.get("subject").is_none());
        assert_eq!(plan.edge_kind("pts", "obs"), Some(EdgeKind::EmbeddedForward));
    }

    #[test]
    fn test_self_reference_falls_back_to_declaration_order() {
        let spec = QuerySpec::staged([
            ("a", StageSpec::new("Patient")),
            ("b", StageSpec::new("Observation").with_filter("code", "{b.code.coding.code}")),
        ]);
        let plan = PlanBuilder::with_default_table().build(&spec).unwrap();

        assert!(plan.cycle_detected);
        assert_eq!(plan.execution_order, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(plan.edge_kind("b", "b"), Some(EdgeKind::FeedsData));
        assert!(plan.node("b").unwrap().depends_on.contains("b"));
    }

    #[test]
    fn test_genuine_cycle_falls_back() {
        let spec = QuerySpec::staged([
            ("x", StageSpec::new("Condition").with_filter("code", "{y.code}")),
            ("y", StageSpec::new("Procedure").with_filter("code", "{x.code}")),
        ]);
        let plan = empty_table_builder().build(&spec).unwrap();

        assert!(plan.cycle_detected);
        assert_eq!(plan.execution_order, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(plan.edge_kind("x", "y"), Some(EdgeKind::Reference));
        assert_eq!(plan.edge_kind("y", "x"), Some(EdgeKind::Reference));
    }

    #[test]
    fn test_schedule_respects_dependencies_not_declaration() {
        let spec = QuerySpec::staged([
            ("late", StageSpec::new("Procedure").with_filter("code", "{early.code}")),
            ("early", StageSpec::new("Condition")),
        ]);
        let plan = empty_table_builder().build(&spec).unwrap();

        assert!(!plan.cycle_detected);
        assert_eq!(
            plan.execution_order,
            vec!["early".to_string(), "late".to_string()]
        );
    }

    #[test]
    fn test_unknown_source_is_kept_as_dependency() {
        let spec = QuerySpec::staged([(
            "s1",
            StageSpec::new("Condition").with_filter("subject", "{ghost.ids}"),
        )]);
        let plan = PlanBuilder::default().build(&spec).unwrap();

        assert!(!plan.cycle_detected);
        assert_eq!(plan.execution_order, vec!["s1".to_string()]);
        assert!(plan.node("s1").unwrap().depends_on.contains("ghost"));
        assert_eq!(plan.edge_count(), 0);
    }
}
