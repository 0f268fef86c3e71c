//! The clinical data service seam.
//!
//! The orchestrator never talks to a server directly. It calls a
//! [`DataService`], which returns raw JSON batches; decoding is lenient and
//! happens in [`Bundle::from_value`](crate::Bundle::from_value).
//!
//! # Example: an in-memory service
//!
//! ```rust
//! use async_trait::async_trait;
//! use fhir_plan::SearchParams;
//! use fhir_plan_executor::{DataService, ServiceError};
//! use serde_json::{json, Value};
//!
//! struct EmptyServer;
//!
//! #[async_trait]
//! impl DataService for EmptyServer {
//!     async fn search(&self, _resource_type: &str, _params: &SearchParams) -> Result<Value, ServiceError> {
//!         Ok(json!({ "resourceType": "Bundle", "total": 0, "entry": [] }))
//!     }
//!
//!     async fn next_page(&self, url: &str) -> Result<Value, ServiceError> {
//!         Err(ServiceError::Transport(format!("no pages behind {}", url)))
//!     }
//! }
//! ```

use async_trait::async_trait;
use fhir_plan::SearchParams;
use serde_json::Value;

use crate::error::ServiceError;

/// A remote (or in-memory) clinical data service.
///
/// Implementations must be shareable across tasks; the orchestrator holds
/// them behind an `Arc<dyn DataService>`.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Searches records of one resource type.
    ///
    /// Returns the raw response body, normally a `searchset` Bundle.
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<Value, ServiceError>;

    /// Fetches the page behind a `next` link returned by an earlier call.
    async fn next_page(&self, url: &str) -> Result<Value, ServiceError>;
}
