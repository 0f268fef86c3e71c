//! # fhir-plan-mapper
//!
//! Derives the structure of an executed query plan's results: record counts
//! per resource type, reference relationships between records, parent-child
//! hierarchies, time ranges, a primary entity and a complexity score, plus a
//! suggested presentation pattern.
//!
//! The output, [`DataStructure`], is plain serializable data meant for a
//! presentation layer.
//!
//! ## Quick Start
//!
//! ```rust
//! use fhir_plan::QuerySpec;
//! use fhir_plan_executor::QueryResult;
//! use fhir_plan_mapper::{Cardinality, RelationshipMapper};
//! use indexmap::IndexMap;
//! use serde_json::json;
//!
//! let spec = QuerySpec::from_json(r#"{
//!     "stages": {
//!         "patients": { "resourceType": "Patient" },
//!         "labs": { "resourceType": "Observation", "filters": { "subject": "{patients.ids}" } }
//!     }
//! }"#).unwrap();
//!
//! let mut patients = QueryResult::new("patients", "Patient");
//! patients.records = vec![json!({ "resourceType": "Patient", "id": "p1" })];
//! let mut labs = QueryResult::new("labs", "Observation");
//! labs.records = vec![
//!     json!({ "resourceType": "Observation", "id": "o1", "subject": { "reference": "Patient/p1" } }),
//!     json!({ "resourceType": "Observation", "id": "o2", "subject": { "reference": "Patient/p1" } }),
//! ];
//!
//! let mut results = IndexMap::new();
//! results.insert("patients".to_string(), patients);
//! results.insert("labs".to_string(), labs);
//!
//! let structure = RelationshipMapper::new().analyze(&results, &spec);
//! assert_eq!(structure.metrics.total_records, 3);
//! assert_eq!(structure.relationships[0].cardinality, Cardinality::OneToMany);
//! assert_eq!(structure.primary_entity.as_deref(), Some("Patient"));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     fhir-plan-mapper                         │
//! │                                                              │
//! │  RelationshipMapper::analyze(results, spec)                  │
//! │  ├── collect records (deduplicated by type and id)           │
//! │  ├── discovery   - reference relationships + cardinality     │
//! │  ├── hierarchy   - parent chains, depth, cycles              │
//! │  ├── temporal    - sampled date ranges, time-series shape    │
//! │  └── patterns    - primary entity, complexity, UI pattern    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod discovery;
mod hierarchy;
mod mapper;
mod patterns;
mod temporal;
mod types;

// Public re-exports
pub use discovery::{cardinality, discover_relationships};
pub use hierarchy::detect_hierarchies;
pub use mapper::{
    fields, weights, MapperConfig, MapperConfigBuilder, RelationshipMapper, TypedRecord,
};
pub use patterns::{complexity_score, primary_entity, suggest_pattern, PatternInputs};
pub use temporal::analyze_temporal;
pub use types::{
    Cardinality, Complexity, DataRelationship, DataStructure, Hierarchy, Metrics, TemporalInfo,
    UiPattern, UiRecommendation,
};
