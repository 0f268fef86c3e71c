//! # fhir-plan-executor
//!
//! Executes [`QueryPlan`](fhir_plan::QueryPlan)s against a clinical data
//! service.
//!
//! Nodes run strictly in sequence. Before each node is sent, its deferred
//! `{stage.field}` filters are substituted with values taken from earlier
//! results. Responses are cached per resolved search, paged within hard
//! bounds and post-processed by the node's aggregations. A node that fails
//! records its error and the plan carries on.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use fhir_plan::{PlanBuilder, QuerySpec, SearchParams};
//! use fhir_plan_executor::{DataService, Orchestrator, ServiceError};
//! use serde_json::{json, Value};
//!
//! struct TwoConditions;
//!
//! #[async_trait]
//! impl DataService for TwoConditions {
//!     async fn search(&self, _: &str, _: &SearchParams) -> Result<Value, ServiceError> {
//!         Ok(json!({
//!             "resourceType": "Bundle",
//!             "total": 2,
//!             "entry": [
//!                 { "resource": { "resourceType": "Condition", "id": "c1" } },
//!                 { "resource": { "resourceType": "Condition", "id": "c2" } }
//!             ]
//!         }))
//!     }
//!
//!     async fn next_page(&self, url: &str) -> Result<Value, ServiceError> {
//!         Err(ServiceError::Transport(url.to_string()))
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let spec = QuerySpec::from_json(r#"{ "resourceType": "Condition" }"#).unwrap();
//! let plan = PlanBuilder::with_default_table().build(&spec).unwrap();
//!
//! let orchestrator = Orchestrator::new(Arc::new(TwoConditions));
//! let results = orchestrator.execute_plan(&plan).await;
//!
//! assert_eq!(results["main"].count(), 2);
//! assert_eq!(orchestrator.stats().queries_executed, 1);
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `http` - Enables [`HttpDataService`], a FHIR REST client built on reqwest
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    fhir-plan-executor                        │
//! │                                                              │
//! │  Orchestrator (per node, in execution order)                 │
//! │  ├── resolve {stage.field} filters from earlier results      │
//! │  ├── cache lookup (LRU + TTL, resolved parameters)           │
//! │  ├── DataService::search + bounded next-page fetches         │
//! │  ├── aggregations (latest_per_subject, count, avg, ...)      │
//! │  └── QueryResult (records, aggregated, error)                │
//! │                                                              │
//! │  DataService trait  - HttpDataService (feature "http")      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod aggregate;
mod bundle;
mod cache;
mod config;
mod error;
#[cfg(feature = "http")]
mod http;
mod orchestrator;
mod resolver;
mod result;
mod traits;

// Public re-exports
pub use aggregate::{aggregate, apply_aggregations, DEFAULT_TIMESTAMP_FIELD, SUBJECT_FIELDS};
pub use bundle::{Bundle, BundleEntry, INCLUDE_MODE};
pub use cache::{cache_key, CachedFetch, QueryCache};
pub use config::{
    CacheConfig, OrchestratorConfig, OrchestratorConfigBuilder, DEFAULT_MAX_PAGES,
    DEFAULT_MAX_TOTAL, DEFAULT_PAGE_SIZE,
};
pub use error::{ExecutorError, ExecutorResult, ServiceError};
#[cfg(feature = "http")]
pub use http::{HttpDataService, FHIR_JSON};
pub use orchestrator::{Orchestrator, COUNT_PARAM, SORT_PARAM};
pub use resolver::{placeholder_values, resolve_filters};
pub use result::{OrchestratorStats, QueryResult};
pub use traits::DataService;
