//! Plan model: query nodes, relationship edges and the execution order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::filter::{FilterValue, Placeholder};
use crate::spec::Aggregation;

/// Search parameters sent to the data service, sorted by name.
pub type SearchParams = BTreeMap<String, String>;

/// Parameter carrying `_include` instructions.
pub const INCLUDE_PARAM: &str = "_include";
/// Parameter carrying `_revinclude` instructions.
pub const REVINCLUDE_PARAM: &str = "_revinclude";
/// Parameter carrying the element subset.
pub const ELEMENTS_PARAM: &str = "_elements";

/// One planned query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryNode {
    /// Unique id within the plan (the stage id).
    pub id: String,
    /// FHIR resource type searched by this node.
    pub resource_type: String,
    /// Search parameters in declaration order.
    pub filters: IndexMap<String, FilterValue>,
    /// `_include` instructions.
    pub include_modifiers: IndexSet<String>,
    /// `_revinclude` instructions.
    pub reverse_include_modifiers: IndexSet<String>,
    /// Elements to retrieve (empty = all).
    pub fields: Vec<String>,
    /// Nodes whose results this node's filters reference.
    pub depends_on: BTreeSet<String>,
    /// Post-processing applied after the fetch, in order.
    pub aggregations: Vec<Aggregation>,
}

impl QueryNode {
    /// Creates a node with no filters or modifiers.
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            filters: IndexMap::new(),
            include_modifiers: IndexSet::new(),
            reverse_include_modifiers: IndexSet::new(),
            fields: Vec::new(),
            depends_on: BTreeSet::new(),
            aggregations: Vec::new(),
        }
    }

    /// Iterates over the deferred filters as `(parameter, placeholder)`.
    pub fn placeholders(&self) -> impl Iterator<Item = (&str, &Placeholder)> {
        self.filters
            .iter()
            .filter_map(|(name, value)| value.placeholder().map(|p| (name.as_str(), p)))
    }

    /// Returns true if any filter is still deferred.
    pub fn has_placeholders(&self) -> bool {
        self.placeholders().next().is_some()
    }

    /// Projects the node onto search parameters.
    ///
    /// Literal filters are copied, modifiers and fields are comma-joined into
    /// one parameter each. Deferred filters and empty literals are omitted.
    pub fn to_params(&self) -> SearchParams {
        self.resolved_params(&BTreeMap::new())
    }

    /// Like [`QueryNode::to_params`], with deferred filters taken from `resolved`.
    ///
    /// A deferred filter without an entry in `resolved` is omitted.
    pub fn resolved_params(&self, resolved: &BTreeMap<String, String>) -> SearchParams {
        let mut params = SearchParams::new();

        for (name, value) in &self.filters {
            let text = match value {
                FilterValue::Literal(s) => Some(s.as_str()),
                FilterValue::Deferred(_) => resolved.get(name).map(String::as_str),
            };
            if let Some(text) = text.filter(|t| !t.is_empty()) {
                params.insert(name.clone(), text.to_string());
            }
        }

        if !self.include_modifiers.is_empty() {
            params.insert(INCLUDE_PARAM.to_string(), join(&self.include_modifiers));
        }
        if !self.reverse_include_modifiers.is_empty() {
            params.insert(
                REVINCLUDE_PARAM.to_string(),
                join(&self.reverse_include_modifiers),
            );
        }
        if !self.fields.is_empty() {
            params.insert(ELEMENTS_PARAM.to_string(), self.fields.join(","));
        }

        params
    }
}

fn join(items: &IndexSet<String>) -> String {
    items.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Kind of a relationship edge between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// The target's data is embedded in the source's response via `_include`.
    EmbeddedForward,
    /// The target's data is embedded in the source's response via `_revinclude`.
    EmbeddedReverse,
    /// A runtime dependency resolved by substituting the source's output.
    Reference,
    /// A data-flow edge the optimizer did not classify (e.g. a self reference).
    FeedsData,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EdgeKind::EmbeddedForward => "embedded-forward",
            EdgeKind::EmbeddedReverse => "embedded-reverse",
            EdgeKind::Reference => "reference",
            EdgeKind::FeedsData => "feeds-data",
        };
        f.write_str(name)
    }
}

/// An outgoing edge from a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanEdge {
    /// The other node.
    pub target: String,
    /// How the two nodes are related.
    pub kind: EdgeKind,
}

/// A complete, scheduled query plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Nodes in declaration order.
    pub nodes: Vec<QueryNode>,
    /// Node ids in the order they must execute.
    pub execution_order: Vec<String>,
    /// Source node id → outgoing edges.
    pub relationships: IndexMap<String, Vec<PlanEdge>>,
    /// True when a cycle forced the declaration-order fallback.
    pub cycle_detected: bool,
}

impl QueryPlan {
    /// Looks up a node by id.
    pub fn node(&self, id: &str) -> Option<&QueryNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes in execution order.
    pub fn scheduled_nodes(&self) -> impl Iterator<Item = &QueryNode> {
        self.execution_order.iter().filter_map(|id| self.node(id))
    }

    /// Kind of the edge from `source` to `target`, if any.
    pub fn edge_kind(&self, source: &str, target: &str) -> Option<EdgeKind> {
        self.relationships
            .get(source)?
            .iter()
            .find(|e| e.target == target)
            .map(|e| e.kind)
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.relationships.values().map(Vec::len).sum()
    }

    /// Position of a node in the execution order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.execution_order.iter().position(|n| n == id)
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query Plan ({} nodes)", self.nodes.len())?;
        if self.cycle_detected {
            writeln!(f, "WARNING: dependency cycle, declaration order used")?;
        }
        writeln!(f)?;

        writeln!(f, "Steps:")?;
        for (i, node) in self.scheduled_nodes().enumerate() {
            write!(f, "  {}. {} → {}", i + 1, node.id, node.resource_type)?;
            let params: Vec<String> = node
                .to_params()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            if !params.is_empty() {
                write!(f, "?{}", params.join("&"))?;
            }
            writeln!(f)?;
            for (name, placeholder) in node.placeholders() {
                writeln!(f, "       {} ← {}", name, placeholder)?;
            }
        }

        if self.edge_count() > 0 {
            writeln!(f)?;
            writeln!(f, "Edges:")?;
            for (source, edges) in &self.relationships {
                for edge in edges {
                    writeln!(f, "  {} → {} ({})", source, edge.target, edge.kind)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab_node() -> QueryNode {
        let mut node = QueryNode::new("labs", "Observation");
        node.filters
            .insert("category".to_string(), FilterValue::from("laboratory"));
        node.filters
            .insert("subject".to_string(), FilterValue::from("{pts.ids}"));
        node.include_modifiers
            .insert("Observation:subject".to_string());
        node.include_modifiers
            .insert("Observation:performer".to_string());
        node.reverse_include_modifiers
            .insert("Provenance:target".to_string());
        node.fields = vec!["id".to_string(), "valueQuantity".to_string()];
        node
    }

    #[test]
    fn test_to_params_projection() {
        let params = lab_node().to_params();

        assert_eq!(params.get("category").map(String::as_str), Some("laboratory"));
        assert!(!params.contains_key("subject"));
        assert_eq!(
            params.get(INCLUDE_PARAM).map(String::as_str),
            Some("Observation:subject,Observation:performer")
        );
        assert_eq!(
            params.get(REVINCLUDE_PARAM).map(String::as_str),
            Some("Provenance:target")
        );
        assert_eq!(
            params.get(ELEMENTS_PARAM).map(String::as_str),
            Some("id,valueQuantity")
        );
    }

    #[test]
    fn test_resolved_params_merges_deferred() {
        let mut resolved = BTreeMap::new();
        resolved.insert("subject".to_string(), "Patient/a,Patient/b".to_string());
        let params = lab_node().resolved_params(&resolved);
        assert_eq!(
            params.get("subject").map(String::as_str),
            Some("Patient/a,Patient/b")
        );
    }

    #[test]
    fn test_empty_node_has_no_params() {
        let node = QueryNode::new("s1", "Condition");
        assert!(node.to_params().is_empty());
        assert!(!node.has_placeholders());
    }

    #[test]
    fn test_edge_kind_display() {
        assert_eq!(EdgeKind::EmbeddedReverse.to_string(), "embedded-reverse");
        assert_eq!(EdgeKind::FeedsData.to_string(), "feeds-data");
        assert_eq!(
            serde_json::to_string(&EdgeKind::EmbeddedForward).unwrap(),
            "\"embedded-forward\""
        );
    }

    #[test]
    fn test_plan_lookup_helpers() {
        let mut relationships = IndexMap::new();
        relationships.insert(
            "pts".to_string(),
            vec![PlanEdge {
                target: "labs".to_string(),
                kind: EdgeKind::Reference,
            }],
        );
        let plan = QueryPlan {
            nodes: vec![QueryNode::new("pts", "Patient"), lab_node()],
            execution_order: vec!["pts".to_string(), "labs".to_string()],
            relationships,
            cycle_detected: false,
        };

        assert_eq!(plan.edge_kind("pts", "labs"), Some(EdgeKind::Reference));
        assert_eq!(plan.edge_kind("labs", "pts"), None);
        assert_eq!(plan.edge_count(), 1);
        assert_eq!(plan.position("labs"), Some(1));

        let rendered = plan.to_string();
        assert!(rendered.contains("1. pts → Patient"));
        assert!(rendered.contains("subject ← {pts.ids}"));
        assert!(rendered.contains("pts → labs (reference)"));
    }
}
