//! Types describing the shape of an executed plan's data.
//!
//! Everything here is plain data, serializable and safe to hand to a
//! presentation layer as is.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// How many records on each side of a relationship participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    /// Every source has one target and every target one source.
    OneToOne,
    /// One side fans out, the other does not.
    OneToMany,
    /// Both sides fan out.
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cardinality::OneToOne => "one-to-one",
            Cardinality::OneToMany => "one-to-many",
            Cardinality::ManyToMany => "many-to-many",
        };
        f.write_str(name)
    }
}

/// A reference relationship observed between two resource types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRelationship {
    /// Type of the referencing records.
    pub source_type: String,
    /// Type of the referenced records.
    pub target_type: String,
    /// Reference element the link was read from.
    pub kind: String,
    /// Cardinality derived from `instances`.
    pub cardinality: Cardinality,
    /// Distinct `(source id, target id)` pairs, in discovery order.
    pub instances: Vec<(String, String)>,
}

/// A parent-child hierarchy within one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hierarchy {
    /// Resource type whose records form the hierarchy.
    pub resource_type: String,
    /// Parent-link element.
    pub field: String,
    /// Records carrying a parent link.
    pub members: usize,
    /// Distinct tops of the parent chains.
    pub roots: usize,
    /// Longest chain of parent links.
    pub max_depth: usize,
    /// True if some parent chain loops back on itself.
    pub cyclic: bool,
}

/// Time range of one resource type's records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemporalInfo {
    /// Date-bearing elements seen in the sampled records.
    pub date_fields: Vec<String>,
    /// Earliest timestamp seen (RFC 3339).
    pub earliest: Option<String>,
    /// Latest timestamp seen (RFC 3339).
    pub latest: Option<String>,
    /// Records of this type across all results.
    pub record_count: usize,
    /// Enough records with dates to be shown over time.
    pub has_time_series: bool,
    /// Whole days between earliest and latest.
    pub span_days: Option<i64>,
}

/// Coarse complexity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Score below 5.
    Simple,
    /// Score below 12.
    Moderate,
    /// Anything else.
    Complex,
}

impl Complexity {
    /// Buckets a complexity score.
    pub fn from_score(score: u32) -> Self {
        if score < 5 {
            Complexity::Simple
        } else if score < 12 {
            Complexity::Moderate
        } else {
            Complexity::Complex
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        };
        f.write_str(name)
    }
}

/// Derived counts and the complexity score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Distinct records across all results.
    pub total_records: usize,
    /// Number of discovered relationships.
    pub relationship_count: usize,
    /// Number of detected hierarchies.
    pub hierarchy_count: usize,
    /// Resource types with at least one record.
    pub resource_type_count: usize,
    /// Weighted complexity score.
    pub complexity_score: u32,
    /// Bucketed complexity.
    pub complexity: Complexity,
}

/// Presentation patterns the analysis can suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UiPattern {
    /// Nothing to show.
    EmptyState,
    /// Aggregated figures.
    Dashboard,
    /// Parent-child records.
    TreeView,
    /// Records over time.
    Timeline,
    /// A single record.
    DetailView,
    /// Several record types around one patient.
    PatientSummary,
    /// Many records.
    DataTable,
    /// A short list.
    ListView,
}

impl UiPattern {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UiPattern::EmptyState => "empty_state",
            UiPattern::Dashboard => "dashboard",
            UiPattern::TreeView => "tree_view",
            UiPattern::Timeline => "timeline",
            UiPattern::DetailView => "detail_view",
            UiPattern::PatientSummary => "patient_summary",
            UiPattern::DataTable => "data_table",
            UiPattern::ListView => "list_view",
        }
    }

    /// Default components for the pattern.
    pub fn components(&self) -> &'static [&'static str] {
        match self {
            UiPattern::EmptyState => &["EmptyState", "SearchPrompt"],
            UiPattern::Dashboard => &["MetricCard", "Chart", "SummaryTable"],
            UiPattern::TreeView => &["TreeView", "DetailPanel"],
            UiPattern::Timeline => &["Timeline", "LineChart", "DataTable"],
            UiPattern::DetailView => &["DetailCard", "FieldList"],
            UiPattern::PatientSummary => &["PatientHeader", "SectionList", "Timeline"],
            UiPattern::DataTable => &["DataTable", "Pagination", "FilterBar"],
            UiPattern::ListView => &["List", "DetailPanel"],
        }
    }

    /// Layout family.
    pub fn layout(&self) -> &'static str {
        match self {
            UiPattern::EmptyState => "centered",
            UiPattern::Dashboard => "grid",
            UiPattern::TreeView => "sidebar",
            UiPattern::Timeline => "stacked",
            UiPattern::DetailView => "single_column",
            UiPattern::PatientSummary => "sections",
            UiPattern::DataTable => "full_width",
            UiPattern::ListView => "master_detail",
        }
    }

    /// Suggested interactions.
    pub fn interactions(&self) -> &'static [&'static str] {
        match self {
            UiPattern::EmptyState => &["refine_query"],
            UiPattern::Dashboard => &["filter", "drill_down", "export"],
            UiPattern::TreeView => &["expand_collapse", "select", "search"],
            UiPattern::Timeline => &["zoom", "filter_by_date", "select"],
            UiPattern::DetailView => &["navigate_references"],
            UiPattern::PatientSummary => &["navigate_sections", "expand", "filter"],
            UiPattern::DataTable => &["sort", "filter", "paginate", "export"],
            UiPattern::ListView => &["select", "search"],
        }
    }
}

impl fmt::Display for UiPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A suggested presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiRecommendation {
    /// Chosen pattern.
    pub pattern: UiPattern,
    /// Components to render.
    pub components: Vec<String>,
    /// Layout family.
    pub layout: String,
    /// Interactions to offer.
    pub interactions: Vec<String>,
}

impl From<UiPattern> for UiRecommendation {
    fn from(pattern: UiPattern) -> Self {
        Self {
            pattern,
            components: pattern.components().iter().map(|c| c.to_string()).collect(),
            layout: pattern.layout().to_string(),
            interactions: pattern.interactions().iter().map(|i| i.to_string()).collect(),
        }
    }
}

/// Structural description of an executed plan's results.
///
/// Rebuilt from scratch by every
/// [`RelationshipMapper::analyze`](crate::RelationshipMapper::analyze) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStructure {
    /// Resource type → number of distinct records.
    ///
    /// Counts are per record rather than per result size: each record is
    /// counted under its own `resourceType` (its node's type when absent), so
    /// records embedded by includes land under their real type, and a record
    /// returned by several nodes is counted once. Every executed node's type
    /// is listed, with 0 when it returned nothing.
    pub resource_types: BTreeMap<String, usize>,
    /// Discovered relationships, in discovery order.
    pub relationships: Vec<DataRelationship>,
    /// Detected hierarchies.
    pub hierarchies: Vec<Hierarchy>,
    /// Resource type → time range, for types with dated records.
    pub temporal_data: BTreeMap<String, TemporalInfo>,
    /// Main subject of the result set.
    pub primary_entity: Option<String>,
    /// Derived counts and complexity.
    pub metrics: Metrics,
    /// Whether any stage declared an aggregation.
    pub aggregations_present: bool,
    /// Suggested presentation.
    pub ui: UiRecommendation,
}

impl DataStructure {
    /// Returns true if any resource type has a time-series shape.
    pub fn has_time_series(&self) -> bool {
        self.temporal_data.values().any(|t| t.has_time_series)
    }

    /// Relationships whose source or target is `resource_type`.
    pub fn relationships_of<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = &'a DataRelationship> {
        self.relationships
            .iter()
            .filter(move |r| r.source_type == resource_type || r.target_type == resource_type)
    }
}
