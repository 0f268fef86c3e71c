//! Error types for plan execution.
//!
//! None of these escape [`Orchestrator::execute_plan`](crate::Orchestrator::execute_plan):
//! a failing node records its error on its own [`QueryResult`](crate::QueryResult)
//! and the plan carries on.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`DataService`](crate::DataService) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status.
    #[error("service returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response body was not JSON.
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Errors that can occur while executing a single node.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// The data service failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A placeholder names a node that has not produced a result.
    #[error("node '{node}' depends on '{source_id}', which has no result")]
    UnresolvedDependency {
        /// Node being executed.
        node: String,
        /// Source named by the placeholder.
        source_id: String,
    },

    /// A data service call exceeded the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// An aggregation could not be computed.
    #[error("aggregation '{op}' failed: {message}")]
    Aggregation {
        /// Aggregation operation name.
        op: String,
        /// What went wrong.
        message: String,
    },
}

/// Result type for executor operations.
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;
