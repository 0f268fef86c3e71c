//! Error types for plan construction.

use thiserror::Error;

/// Errors that can occur while turning a query specification into a plan.
///
/// All of these are structural and are raised before any query is sent.
#[derive(Error, Debug)]
pub enum PlanError {
    /// A stage was declared without a resource type.
    #[error("stage '{stage}' has no resourceType")]
    MissingResourceType {
        /// Identifier of the offending stage.
        stage: String,
    },

    /// The specification declares no stages at all.
    #[error("query specification declares no stages")]
    EmptySpecification,

    /// The specification could not be decoded.
    #[error("invalid query specification: {0}")]
    InvalidSpecification(#[from] serde_json::Error),
}

/// Result type for plan operations.
pub type PlanResult<T> = std::result::Result<T, PlanError>;
