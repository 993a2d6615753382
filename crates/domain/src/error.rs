//! Domain error types.

use chrono::NaiveDate;
use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::coupon::CouponRejection;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed input: bad attendee count, bad coupon code, bad range.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// A day of the requested span is blocked out.
    #[error("Date unavailable: {0}")]
    DateUnavailable(NaiveDate),

    /// The requested window is outside business hours or overlaps another session.
    #[error("Time slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Capacity exceeded: requested {requested}, available {available}")]
    CapacityExceeded { requested: u32, available: u32 },

    #[error("Workshop {0} is closed for bookings")]
    WorkshopClosed(String),

    #[error("Booking not found: {0}")]
    BookingNotFound(AggregateId),

    #[error("Workshop not found: {0}")]
    WorkshopNotFound(String),

    #[error("Blockout not found: {0}")]
    BlockoutNotFound(AggregateId),

    #[error("Coupon not found: {0}")]
    CouponNotFound(String),

    #[error("Coupon already exists: {0}")]
    CouponExists(String),

    /// The coupon exists but cannot be applied right now.
    #[error("Coupon {code} is invalid: {reason}")]
    CouponInvalid {
        code: String,
        reason: CouponRejection,
    },

    /// The entity is not in a state that allows the action.
    #[error("Cannot {action} {entity} in state {state}")]
    InvalidState {
        entity: &'static str,
        state: String,
        action: &'static str,
    },
}

impl DomainError {
    /// Returns true for errors that say something does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::ProductNotFound(_)
                | DomainError::BookingNotFound(_)
                | DomainError::WorkshopNotFound(_)
                | DomainError::BlockoutNotFound(_)
                | DomainError::CouponNotFound(_)
        )
    }
}
