//! Declarative query specification accepted by the plan builder.
//!
//! A specification is either a single stage or a `stages` map of
//! stage-id → stage. It is usually produced upstream as JSON:
//!
//! ```json
//! {
//!   "stages": {
//!     "patients": { "resourceType": "Patient", "filters": { "name": "smith" } },
//!     "labs": {
//!       "resourceType": "Observation",
//!       "filters": { "subject": "{patients.ids}", "category": "laboratory" },
//!       "aggregate": { "op": "latest_per_subject" }
//!     }
//!   }
//! }
//! ```

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PlanResult;

/// Stage id given to the node built from a single-stage specification.
pub const SINGLE_STAGE_ID: &str = "main";

/// A complete query specification.
///
/// An object with a `stages` member is always read as staged, so a malformed
/// stage is reported as such instead of falling back to a single stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QuerySpec {
    /// Several named stages, in declaration order.
    Staged {
        /// Stage id → stage description.
        stages: IndexMap<String, StageSpec>,
    },
    /// A single query description.
    Single(StageSpec),
}

impl<'de> Deserialize<'de> for QuerySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = Value::deserialize(deserializer)?;
        match value.as_object_mut().and_then(|obj| obj.remove("stages")) {
            Some(stages) => serde_json::from_value(stages)
                .map(|stages| QuerySpec::Staged { stages })
                .map_err(|e| D::Error::custom(format!("stages: {}", e))),
            None => serde_json::from_value(value)
                .map(QuerySpec::Single)
                .map_err(D::Error::custom),
        }
    }
}

impl QuerySpec {
    /// Decodes a specification from a JSON string.
    pub fn from_json(json: &str) -> PlanResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decodes a specification from an already parsed JSON value.
    pub fn from_value(value: Value) -> PlanResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Builds a staged specification from `(id, stage)` pairs.
    pub fn staged<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = (S, StageSpec)>,
        S: Into<String>,
    {
        QuerySpec::Staged {
            stages: stages.into_iter().map(|(id, s)| (id.into(), s)).collect(),
        }
    }

    /// Returns the stages in declaration order.
    ///
    /// A single-stage specification yields one stage named [`SINGLE_STAGE_ID`].
    pub fn stages(&self) -> Vec<(&str, &StageSpec)> {
        match self {
            QuerySpec::Staged { stages } => {
                stages.iter().map(|(id, s)| (id.as_str(), s)).collect()
            }
            QuerySpec::Single(stage) => vec![(SINGLE_STAGE_ID, stage)],
        }
    }

    /// Resource type of the first stage explicitly marked `primary`.
    pub fn primary_resource_type(&self) -> Option<&str> {
        self.stages()
            .into_iter()
            .find(|(_, s)| s.primary)
            .and_then(|(_, s)| s.resource_type.as_deref())
    }

    /// Returns true if any stage declares an aggregation.
    pub fn has_aggregations(&self) -> bool {
        self.stages()
            .iter()
            .any(|(_, s)| s.aggregate.as_ref().is_some_and(|a| !a.is_empty()))
    }
}

/// A single stage of a specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageSpec {
    /// FHIR resource type to search.
    pub resource_type: Option<String>,
    /// Search parameters; string values may be `{stage.field}` placeholders.
    pub filters: IndexMap<String, Value>,
    /// `_include` instructions.
    pub include: Vec<String>,
    /// `_revinclude` instructions.
    #[serde(alias = "reverseInclude")]
    pub revinclude: Vec<String>,
    /// Subset of elements to return (empty = all).
    #[serde(alias = "elements")]
    pub fields: Vec<String>,
    /// Post-processing applied to the fetched records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateSpec>,
    /// Marks this stage's resource type as the primary entity.
    pub primary: bool,
}

impl StageSpec {
    /// Creates a stage for the given resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::default()
        }
    }

    /// Adds a filter.
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Adds an `_include` instruction.
    pub fn with_include(mut self, include: impl Into<String>) -> Self {
        self.include.push(include.into());
        self
    }

    /// Adds a `_revinclude` instruction.
    pub fn with_revinclude(mut self, revinclude: impl Into<String>) -> Self {
        self.revinclude.push(revinclude.into());
        self
    }

    /// Adds an element to the field list.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Appends an aggregation.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        let mut all = self.aggregate.take().map(AggregateSpec::into_vec).unwrap_or_default();
        all.push(aggregation);
        self.aggregate = Some(AggregateSpec::Many(all));
        self
    }

    /// Marks the stage as primary.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// One aggregation descriptor or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateSpec {
    /// A single descriptor.
    One(Aggregation),
    /// Descriptors applied in order.
    Many(Vec<Aggregation>),
}

impl AggregateSpec {
    /// Returns the descriptors in declared order.
    pub fn into_vec(self) -> Vec<Aggregation> {
        match self {
            AggregateSpec::One(a) => vec![a],
            AggregateSpec::Many(all) => all,
        }
    }

    /// Returns true if no descriptor is declared.
    pub fn is_empty(&self) -> bool {
        matches!(self, AggregateSpec::Many(all) if all.is_empty())
    }
}

/// In-memory post-processing of a node's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    /// The operation to apply.
    pub op: AggregateOp,
    /// Dotted path of the value (or timestamp for `latest_per_subject`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Dotted path to group by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
}

impl Aggregation {
    /// Creates an aggregation without field or grouping.
    pub fn new(op: AggregateOp) -> Self {
        Self {
            op,
            field: None,
            group_by: None,
        }
    }

    /// Sets the value field.
    pub fn on(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Sets the grouping field.
    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by = Some(field.into());
        self
    }

    /// Key under which the result is stored: `op` or `op_field`.
    pub fn result_key(&self) -> String {
        match &self.field {
            Some(field) => format!("{}_{}", self.op.as_str(), field),
            None => self.op.as_str().to_string(),
        }
    }

    /// Key under which a failure is stored: `error_op_field`.
    pub fn error_key(&self) -> String {
        format!(
            "error_{}_{}",
            self.op.as_str(),
            self.field.as_deref().unwrap_or("")
        )
    }
}

/// Supported aggregation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    /// One record per subject, keeping the most recent.
    #[serde(alias = "latest")]
    LatestPerSubject,
    /// Number of records, optionally grouped.
    Count,
    /// Mean of a numeric field.
    #[serde(alias = "avg")]
    Average,
    /// Sum of a numeric field.
    Sum,
    /// Minimum of a numeric field.
    Min,
    /// Maximum of a numeric field.
    Max,
    /// Partition of the records by a field value.
    Group,
}

impl AggregateOp {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::LatestPerSubject => "latest_per_subject",
            AggregateOp::Count => "count",
            AggregateOp::Average => "average",
            AggregateOp::Sum => "sum",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Group => "group",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_staged() {
        let spec = QuerySpec::from_value(json!({
            "stages": {
                "s1": { "resourceType": "Patient" },
                "s2": { "resourceType": "Condition", "filters": { "subject": "{s1.ids}" } }
            }
        }))
        .unwrap();

        let stages = spec.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].0, "s1");
        assert_eq!(stages[1].0, "s2");
        assert_eq!(stages[1].1.resource_type.as_deref(), Some("Condition"));
    }

    #[test]
    fn test_parse_single() {
        let spec = QuerySpec::from_json(
            r#"{"resourceType": "Observation", "filters": {"code": "8867-4"}, "elements": ["id"]}"#,
        )
        .unwrap();

        let stages = spec.stages();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].0, SINGLE_STAGE_ID);
        assert_eq!(stages[0].1.fields, vec!["id".to_string()]);
    }

    #[test]
    fn test_malformed_stage_is_not_read_as_single() {
        let err = QuerySpec::from_value(json!({
            "stages": {
                "s1": { "resourceType": "Patient", "filters": "x" }
            }
        }))
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("stages"), "{}", message);
        assert!(!message.contains("has no resourceType"), "{}", message);
    }

    #[test]
    fn test_parse_aggregate_one_or_many() {
        let one: StageSpec = serde_json::from_value(json!({
            "resourceType": "Observation",
            "aggregate": { "op": "avg", "field": "valueQuantity.value" }
        }))
        .unwrap();
        let aggs = one.aggregate.unwrap().into_vec();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].op, AggregateOp::Average);

        let many: StageSpec = serde_json::from_value(json!({
            "resourceType": "Observation",
            "aggregate": [{ "op": "count", "groupBy": "code.text" }, { "op": "latest" }]
        }))
        .unwrap();
        let aggs = many.aggregate.unwrap().into_vec();
        assert_eq!(aggs[0].group_by.as_deref(), Some("code.text"));
        assert_eq!(aggs[1].op, AggregateOp::LatestPerSubject);
    }

    #[test]
    fn test_result_and_error_keys() {
        let agg = Aggregation::new(AggregateOp::Max).on("valueQuantity.value");
        assert_eq!(agg.result_key(), "max_valueQuantity.value");
        assert_eq!(agg.error_key(), "error_max_valueQuantity.value");

        let count = Aggregation::new(AggregateOp::Count);
        assert_eq!(count.result_key(), "count");
        assert_eq!(count.error_key(), "error_count_");
    }

    #[test]
    fn test_primary_and_aggregations() {
        let spec = QuerySpec::staged([
            ("a", StageSpec::new("Encounter")),
            (
                "b",
                StageSpec::new("Condition")
                    .primary()
                    .with_aggregation(Aggregation::new(AggregateOp::Count)),
            ),
        ]);
        assert_eq!(spec.primary_resource_type(), Some("Condition"));
        assert!(spec.has_aggregations());
    }
}
