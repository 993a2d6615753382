//! Workshop sessions and their seat counters.

mod aggregate;
mod events;

pub use aggregate::{SessionPlan, Workshop, WorkshopStatus};
pub use events::{
    CapacityChangedData, SeatsClaimedData, SeatsReleasedData, WorkshopClosedData, WorkshopEvent,
    WorkshopScheduledData,
};

use chrono::NaiveDateTime;
use common::StreamId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ProductId;
use crate::error::DomainError;

/// Identifier of one session of a product, e.g. `ai-leadership-3day-20250602T0900`.
///
/// Derived from the product and start time, so every booking for the same
/// session lands on the same seat counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkshopId(String);

impl WorkshopId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn for_session(product_id: &ProductId, start: NaiveDateTime) -> Self {
        Self(format!("{}-{}", product_id, start.format("%Y%m%dT%H%M")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn stream_id(&self) -> StreamId {
        StreamId::of("workshop", &self.0)
    }
}

impl std::fmt::Display for WorkshopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors that can occur during workshop operations.
#[derive(Debug, Error)]
pub enum WorkshopError {
    #[error("Workshop has not been scheduled")]
    NotScheduled,

    #[error("Not enough seats: requested {requested}, available {available}")]
    CapacityExceeded { requested: u32, available: u32 },

    #[error("Workshop {0} is closed")]
    Closed(WorkshopId),

    #[error("Capacity {capacity} is below the {attendees} attendees already booked")]
    CapacityBelowAttendees { capacity: u32, attendees: u32 },
}

impl From<WorkshopError> for DomainError {
    fn from(e: WorkshopError) -> Self {
        match e {
            WorkshopError::NotScheduled => DomainError::Validation(e.to_string()),
            WorkshopError::CapacityExceeded {
                requested,
                available,
            } => DomainError::CapacityExceeded {
                requested,
                available,
            },
            WorkshopError::Closed(id) => DomainError::WorkshopClosed(id.to_string()),
            WorkshopError::CapacityBelowAttendees { .. } => DomainError::Validation(e.to_string()),
        }
    }
}
