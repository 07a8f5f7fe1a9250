//! Error types for sqlspy

use thiserror::Error;

/// Result type alias for sqlspy operations
pub type SpyResult<T> = Result<T, SpyError>;

/// Error types for query tracking and the instrumented data-access layer
#[derive(Debug, Error)]
pub enum SpyError {
    /// Topic name rejected by the event source
    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Subscription handle is not (or no longer) registered with the event source
    #[error("Unknown subscription #{id} on topic '{topic}'")]
    UnknownSubscription { topic: String, id: u64 },

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl SpyError {
    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an untyped error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Check if this is an unknown subscription error
    pub fn is_unknown_subscription(&self) -> bool {
        matches!(self, Self::UnknownSubscription { .. })
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
