//! # fhir-plan
//!
//! Builds dependency-ordered query plans for a FHIR clinical-data service.
//!
//! A declarative, possibly multi-stage [`QuerySpec`] is turned into a
//! [`QueryPlan`]: one [`QueryNode`] per stage, the relationship edges between
//! them and an execution order. Filters of the form `{stage.field}` are
//! runtime dependencies on another stage's output; wherever the
//! [`RelationshipTable`] allows it the builder folds such a dependency into a
//! single request with `_include` / `_revinclude`.
//!
//! ## Quick Start
//!
//! ```rust
//! use fhir_plan::{EdgeKind, PlanBuilder, QuerySpec};
//!
//! let spec = QuerySpec::from_json(r#"{
//!     "stages": {
//!         "s1": { "resourceType": "Observation", "filters": { "code": "8867-4" } },
//!         "s2": { "resourceType": "Condition", "filters": { "subject": "{s1.ids}" } }
//!     }
//! }"#).unwrap();
//!
//! let plan = PlanBuilder::with_default_table().build(&spec).unwrap();
//!
//! assert_eq!(plan.execution_order, vec!["s1", "s2"]);
//! assert_eq!(plan.edge_kind("s1", "s2"), Some(EdgeKind::Reference));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        fhir-plan                          │
//! │                                                           │
//! │  QuerySpec ──► PlanBuilder ──► QueryPlan                  │
//! │                 ├── nodes + feeds-data edges              │
//! │                 ├── _include / _revinclude rewrite        │
//! │                 │     (RelationshipTable)                 │
//! │                 └── Kahn scheduling                       │
//! │                                                           │
//! │  record        - lenient JSON accessors shared downstream │
//! └──────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod builder;
mod error;
mod filter;
mod model;
pub mod record;
mod relationships;
mod spec;

pub use builder::PlanBuilder;
pub use error::{PlanError, PlanResult};
pub use filter::{FilterValue, Placeholder, PlaceholderField, DEFAULT_REFERENCE_FIELD};
pub use model::{
    EdgeKind, PlanEdge, QueryNode, QueryPlan, SearchParams, ELEMENTS_PARAM, INCLUDE_PARAM,
    REVINCLUDE_PARAM,
};
pub use relationships::{ReferenceField, RelationshipTable, RelationshipTableBuilder};
pub use spec::{AggregateOp, AggregateSpec, Aggregation, QuerySpec, StageSpec, SINGLE_STAGE_ID};
