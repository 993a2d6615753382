//! Projection error types.

use thiserror::Error;

/// Errors that can occur while feeding a projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// The payload of a journal row does not decode to the expected event.
    #[error("Event deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
