//! Per-node execution results and orchestrator statistics.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use fhir_plan::{record, SearchParams};
use serde::Serialize;
use serde_json::Value;

use crate::bundle::{BundleEntry, INCLUDE_MODE};

/// Result of executing one query node.
///
/// A failed node still produces a result: `error` is set and `records` holds
/// whatever was fetched before the failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Id of the node that produced this result.
    pub node_id: String,
    /// Resource type searched.
    pub resource_type: String,
    /// Parameters of the first request.
    pub params: SearchParams,
    /// First raw response.
    pub raw: Option<Value>,
    /// Records of every fetched page, in response order.
    pub records: Vec<Value>,
    /// `search.mode` of each record, parallel to `records`; `None` when the
    /// service did not say.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_modes: Vec<Option<String>>,
    /// Total reported by the service.
    pub total: Option<usize>,
    /// Number of responses fetched.
    pub pages: usize,
    /// Aggregation results keyed by `op` / `op_field`, errors by `error_op_field`.
    pub aggregated: BTreeMap<String, Value>,
    /// Wall time spent on this node.
    pub elapsed: Duration,
    /// Why the node failed, if it did.
    pub error: Option<String>,
    /// Whether the records came from the cache.
    pub cache_hit: bool,
}

impl QueryResult {
    /// Creates an empty result for a node.
    pub fn new(node_id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    /// Returns the number of records.
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no record was fetched.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if the node did not fail.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Appends decoded bundle entries, keeping each entry's search mode.
    pub fn push_entries(&mut self, entries: Vec<BundleEntry>) {
        self.search_modes.resize(self.records.len(), None);
        for entry in entries {
            self.records.push(entry.resource);
            self.search_modes.push(entry.search_mode);
        }
    }

    /// Returns true if the record at `index` was embedded by an include.
    pub fn is_included(&self, index: usize) -> bool {
        self.search_modes.get(index).and_then(Option::as_deref) == Some(INCLUDE_MODE)
    }

    /// Records matched by the search itself, skipping those embedded by
    /// `_include` / `_revinclude`.
    ///
    /// The entry's `search.mode` decides when the service reported one.
    /// Otherwise records of another type are taken as embedded, and records
    /// without a `resourceType` as matches.
    pub fn primary_records(&self) -> impl Iterator<Item = &Value> {
        self.records.iter().enumerate().filter_map(move |(i, r)| {
            let primary = match self.search_modes.get(i).and_then(Option::as_deref) {
                Some(mode) => mode != INCLUDE_MODE,
                None => record::resource_type(r).map_or(true, |t| t == self.resource_type),
            };
            primary.then_some(r)
        })
    }

    /// Records of a given type, embedded ones included.
    pub fn records_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Value> {
        self.records
            .iter()
            .filter(move |r| record::resource_type(r) == Some(resource_type))
    }
}

/// Statistics accumulated over the life of one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    /// Number of nodes executed.
    pub queries_executed: usize,
    /// Nodes served from the cache.
    pub cache_hits: usize,
    /// Nodes that had to be fetched.
    pub cache_misses: usize,
    /// Nodes that ended with an error.
    pub failed_nodes: usize,
    /// Responses fetched, first pages included.
    pub pages_fetched: usize,
    /// Records returned across all nodes.
    pub total_records: usize,
    /// Time spent executing nodes.
    pub total_elapsed: Duration,
}

impl OrchestratorStats {
    /// Returns the cache hit rate as a percentage.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Returns the average time per node in milliseconds.
    pub fn avg_node_time_ms(&self) -> f64 {
        if self.queries_executed == 0 {
            0.0
        } else {
            self.total_elapsed.as_secs_f64() * 1000.0 / self.queries_executed as f64
        }
    }
}

impl fmt::Display for OrchestratorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Orchestrator Statistics:")?;
        writeln!(f, "  Queries:         {}", self.queries_executed)?;
        writeln!(f, "  Cache hits:      {}", self.cache_hits)?;
        writeln!(f, "  Cache misses:    {}", self.cache_misses)?;
        writeln!(f, "  Hit rate:        {:.1}%", self.cache_hit_rate())?;
        writeln!(f, "  Failed nodes:    {}", self.failed_nodes)?;
        writeln!(f, "  Pages fetched:   {}", self.pages_fetched)?;
        writeln!(f, "  Records:         {}", self.total_records)?;
        writeln!(
            f,
            "  Total time:      {:.1}ms",
            self.total_elapsed.as_secs_f64() * 1000.0
        )?;
        writeln!(f, "  Avg time:        {:.2}ms", self.avg_node_time_ms())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_result_empty() {
        let result = QueryResult::new("s1", "Condition");
        assert_eq!(result.count(), 0);
        assert!(result.is_empty());
        assert!(result.is_ok());
    }

    #[test]
    fn test_primary_records_skip_included() {
        let mut result = QueryResult::new("obs", "Observation");
        result.records = vec![
            json!({ "resourceType": "Observation", "id": "o1" }),
            json!({ "resourceType": "Patient", "id": "p1" }),
            json!({ "id": "o2" }),
        ];

        let primary: Vec<_> = result
            .primary_records()
            .filter_map(record::resource_id)
            .collect();
        assert_eq!(primary, vec!["o1", "o2"]);
        assert_eq!(result.records_of_type("Patient").count(), 1);
    }

    #[test]
    fn test_search_mode_overrides_type_check() {
        let entry = |id: &str, mode: &str| BundleEntry {
            resource: json!({ "resourceType": "Observation", "id": id }),
            search_mode: Some(mode.to_string()),
        };
        let mut result = QueryResult::new("panels", "Observation");
        result.push_entries(vec![entry("panel", "match"), entry("member", "include")]);

        let primary: Vec<_> = result
            .primary_records()
            .filter_map(record::resource_id)
            .collect();
        assert_eq!(primary, vec!["panel"]);
        assert!(result.is_included(1));
        assert!(!result.is_included(0));
        assert_eq!(result.count(), 2);
    }

    #[test]
    fn test_push_entries_after_plain_records() {
        let mut result = QueryResult::new("obs", "Observation");
        result.records = vec![json!({ "resourceType": "Observation", "id": "o1" })];
        result.push_entries(vec![BundleEntry {
            resource: json!({ "resourceType": "Observation", "id": "o2" }),
            search_mode: Some("include".to_string()),
        }]);

        assert_eq!(result.search_modes, vec![None, Some("include".to_string())]);
        assert_eq!(result.primary_records().count(), 1);
    }

    #[test]
    fn test_stats_rates() {
        let stats = OrchestratorStats {
            queries_executed: 4,
            cache_hits: 1,
            cache_misses: 3,
            total_elapsed: Duration::from_millis(40),
            ..OrchestratorStats::default()
        };
        assert!((stats.cache_hit_rate() - 25.0).abs() < 0.01);
        assert!((stats.avg_node_time_ms() - 10.0).abs() < 0.01);

        let empty = OrchestratorStats::default();
        assert!((empty.cache_hit_rate() - 0.0).abs() < 0.01);
    }

    #[test]
    fn test_stats_display() {
        let report = OrchestratorStats::default().to_string();
        assert!(report.starts_with("Orchestrator Statistics:"));
        assert!(report.contains("Hit rate:        0.0%"));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let mut result = QueryResult::new("s1", "Condition");
        result.error = Some("boom".to_string());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["nodeId"], "s1");
        assert_eq!(value["cacheHit"], false);
        assert_eq!(value["error"], "boom");
    }
}
