//! The relationship mapper and its configuration.

use std::collections::{BTreeMap, HashSet};

use fhir_plan::{record, QuerySpec};
use fhir_plan_executor::QueryResult;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::discovery::discover_relationships;
use crate::hierarchy::detect_hierarchies;
use crate::patterns::{complexity_score, primary_entity, suggest_pattern, PatternInputs};
use crate::temporal::analyze_temporal;
use crate::types::{Complexity, DataStructure, Metrics, UiRecommendation};

/// Element names the mapper reads.
pub mod fields {
    /// Reference elements followed during relationship discovery.
    pub const REFERENCE_FIELDS: &[&str] = &[
        "subject",
        "patient",
        "encounter",
        "performer",
        "requester",
        "asserter",
        "recorder",
        "author",
        "basedOn",
        "partOf",
        "hasMember",
        "result",
        "context",
        "organization",
        "managingOrganization",
        "generalPractitioner",
        "practitioner",
        "location",
        "serviceProvider",
        "medicationReference",
        "reasonReference",
        "focus",
        "derivedFrom",
        "specimen",
    ];

    /// Parent-link elements that make a record part of a hierarchy.
    pub const PARENT_FIELDS: &[&str] = &["partOf", "parent"];

    /// Date-bearing elements sampled by temporal analysis.
    pub const DATE_FIELDS: &[&str] = &[
        "effectiveDateTime",
        "effectiveInstant",
        "effectivePeriod.start",
        "issued",
        "onsetDateTime",
        "abatementDateTime",
        "recordedDate",
        "authoredOn",
        "performedDateTime",
        "performedPeriod.start",
        "occurrenceDateTime",
        "period.start",
        "period.end",
        "date",
    ];
}

/// Complexity weights and pattern thresholds.
pub mod weights {
    /// Score per discovered relationship.
    pub const RELATIONSHIP: u32 = 2;

    /// Score per detected hierarchy.
    pub const HIERARCHY: u32 = 3;

    /// Score when aggregations are present.
    pub const AGGREGATION: u32 = 4;

    /// Score per resource type beyond the first.
    pub const EXTRA_RESOURCE_TYPE: u32 = 1;

    /// Record count above which a flat result is shown as a data table.
    pub const DATA_TABLE_THRESHOLD: usize = 50;
}

/// Configuration for [`RelationshipMapper`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    /// Records sampled per resource type for date fields.
    pub sample_size: usize,
    /// Record count a type must exceed to count as a time series.
    pub time_series_threshold: usize,
    /// Type preferred as primary entity when nothing is marked primary.
    pub subject_type: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            time_series_threshold: 5,
            subject_type: "Patient".to_string(),
        }
    }
}

impl MapperConfig {
    /// Creates a builder starting from the defaults.
    pub fn builder() -> MapperConfigBuilder {
        MapperConfigBuilder::default()
    }
}

/// Builder for [`MapperConfig`].
#[derive(Debug, Default)]
pub struct MapperConfigBuilder {
    config: MapperConfig,
}

impl MapperConfigBuilder {
    /// Sets the number of records sampled per type.
    pub fn with_sample_size(mut self, size: usize) -> Self {
        self.config.sample_size = size;
        self
    }

    /// Sets the time-series record threshold.
    pub fn with_time_series_threshold(mut self, threshold: usize) -> Self {
        self.config.time_series_threshold = threshold;
        self
    }

    /// Sets the subject type.
    pub fn with_subject_type(mut self, resource_type: impl Into<String>) -> Self {
        self.config.subject_type = resource_type.into();
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> MapperConfig {
        self.config
    }
}

/// A record together with the type it is counted under.
#[derive(Debug, Clone, Copy)]
pub struct TypedRecord<'a> {
    /// The record's own `resourceType`, or its node's type.
    pub resource_type: &'a str,
    /// Logical id, if any.
    pub id: Option<&'a str>,
    /// The record.
    pub value: &'a Value,
}

impl<'a> TypedRecord<'a> {
    /// Types a record by its own `resourceType`; untyped records yield `None`.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        record::resource_type(value).map(|resource_type| Self {
            resource_type,
            id: record::resource_id(value),
            value,
        })
    }

    fn with_fallback(value: &'a Value, fallback: &'a str) -> Self {
        Self {
            resource_type: record::resource_type(value).unwrap_or(fallback),
            id: record::resource_id(value),
            value,
        }
    }
}

/// Derives a [`DataStructure`] from executed results.
///
/// The mapper holds only configuration; every call to
/// [`analyze`](Self::analyze) starts from nothing.
///
/// # Example
///
/// ```rust
/// use fhir_plan::QuerySpec;
/// use fhir_plan_executor::QueryResult;
/// use fhir_plan_mapper::{RelationshipMapper, UiPattern};
/// use indexmap::IndexMap;
/// use serde_json::json;
///
/// let spec = QuerySpec::from_json(r#"{ "resourceType": "Patient" }"#).unwrap();
/// let mut result = QueryResult::new("main", "Patient");
/// result.records = vec![json!({ "resourceType": "Patient", "id": "p1" })];
///
/// let mut results = IndexMap::new();
/// results.insert("main".to_string(), result);
///
/// let structure = RelationshipMapper::new().analyze(&results, &spec);
/// assert_eq!(structure.primary_entity.as_deref(), Some("Patient"));
/// assert_eq!(structure.ui.pattern, UiPattern::DetailView);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RelationshipMapper {
    config: MapperConfig,
}

impl RelationshipMapper {
    /// Creates a mapper with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mapper with a custom configuration.
    pub fn with_config(config: MapperConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Analyzes the results of one plan execution.
    pub fn analyze(
        &self,
        results: &IndexMap<String, QueryResult>,
        spec: &QuerySpec,
    ) -> DataStructure {
        let records = collect_records(results);

        let mut resource_types: BTreeMap<String, usize> = results
            .values()
            .map(|r| (r.resource_type.clone(), 0))
            .collect();
        for rec in &records {
            *resource_types.entry(rec.resource_type.to_string()).or_insert(0) += 1;
        }

        let relationships = discover_relationships(&records);
        let hierarchies = detect_hierarchies(&records);
        let temporal_data = analyze_temporal(&records, &self.config);
        let primary_entity = primary_entity(spec, &resource_types, &self.config.subject_type);

        let aggregations_present =
            spec.has_aggregations() || results.values().any(|r| !r.aggregated.is_empty());
        let populated_types = resource_types.values().filter(|c| **c > 0).count();

        let complexity_score = complexity_score(
            relationships.len(),
            hierarchies.len(),
            aggregations_present,
            populated_types,
        );
        let metrics = Metrics {
            total_records: records.len(),
            relationship_count: relationships.len(),
            hierarchy_count: hierarchies.len(),
            resource_type_count: populated_types,
            complexity_score,
            complexity: Complexity::from_score(complexity_score),
        };

        let pattern = suggest_pattern(&PatternInputs {
            total_records: records.len(),
            populated_types,
            aggregations_present,
            has_hierarchies: !hierarchies.is_empty(),
            has_time_series: temporal_data.values().any(|t| t.has_time_series),
            primary_is_subject: primary_entity.as_deref() == Some(self.config.subject_type.as_str()),
        });

        debug!(
            records = metrics.total_records,
            types = populated_types,
            relationships = metrics.relationship_count,
            hierarchies = metrics.hierarchy_count,
            complexity = %metrics.complexity,
            %pattern,
            "mapper.analyze"
        );

        DataStructure {
            resource_types,
            relationships,
            hierarchies,
            temporal_data,
            primary_entity,
            metrics,
            aggregations_present,
            ui: UiRecommendation::from(pattern),
        }
    }
}

/// Gathers every record once, in result order.
///
/// Records with an id are deduplicated by (type, id) so an included resource
/// returned by two nodes is counted once.
fn collect_records(results: &IndexMap<String, QueryResult>) -> Vec<TypedRecord<'_>> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut records = Vec::new();

    for result in results.values() {
        for value in &result.records {
            let rec = TypedRecord::with_fallback(value, &result.resource_type);
            if let Some(id) = rec.id {
                if !seen.insert((rec.resource_type, id)) {
                    continue;
                }
            }
            records.push(rec);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(node: &str, ty: &str, records: Vec<Value>) -> QueryResult {
        let mut r = QueryResult::new(node, ty);
        r.records = records;
        r
    }

    #[test]
    fn test_config_builder() {
        let config = MapperConfig::builder()
            .with_sample_size(3)
            .with_time_series_threshold(1)
            .with_subject_type("Group")
            .build();
        assert_eq!(config.sample_size, 3);
        assert_eq!(config.time_series_threshold, 1);
        assert_eq!(config.subject_type, "Group");
        assert_eq!(MapperConfig::default().sample_size, 10);
    }

    #[test]
    fn test_collect_dedupes_shared_records() {
        let patient = json!({ "resourceType": "Patient", "id": "p1" });
        let mut results = IndexMap::new();
        results.insert("a".to_string(), result("a", "Patient", vec![patient.clone()]));
        results.insert(
            "b".to_string(),
            result(
                "b",
                "Observation",
                vec![json!({ "resourceType": "Observation", "id": "o1" }), patient],
            ),
        );

        let records = collect_records(&results);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_untyped_record_counts_under_node_type() {
        let mut results = IndexMap::new();
        results.insert(
            "main".to_string(),
            result("main", "Condition", vec![json!({ "id": "c1" })]),
        );
        let spec = QuerySpec::from_json(r#"{ "resourceType": "Condition" }"#).unwrap();

        let structure = RelationshipMapper::new().analyze(&results, &spec);
        assert_eq!(structure.resource_types["Condition"], 1);
    }

    #[test]
    fn test_empty_node_type_is_listed() {
        let mut results = IndexMap::new();
        results.insert("main".to_string(), result("main", "Encounter", vec![]));
        let spec = QuerySpec::from_json(r#"{ "resourceType": "Encounter" }"#).unwrap();

        let structure = RelationshipMapper::new().analyze(&results, &spec);
        assert_eq!(structure.resource_types["Encounter"], 0);
        assert_eq!(structure.metrics.resource_type_count, 0);
    }
}
