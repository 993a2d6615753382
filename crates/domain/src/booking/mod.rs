//! Bookings: a reservation of seats in one session.

mod aggregate;
mod events;
mod registry;

pub use aggregate::{Booking, BookingStatus};
pub use events::{BookingCancelledData, BookingConfirmedData, BookingCreatedData, BookingEvent};
pub use registry::{BookingRegistry, NewBooking};

use common::{AggregateId, StreamId};
use thiserror::Error;

use crate::error::DomainError;

pub(crate) fn booking_stream(id: AggregateId) -> StreamId {
    StreamId::of("booking", id)
}

/// Errors that can occur during booking operations.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Booking already exists")]
    AlreadyExists,

    #[error("Booking does not exist")]
    NotCreated,

    #[error("Cannot {action} booking in state {state}")]
    InvalidTransition {
        state: BookingStatus,
        action: &'static str,
    },
}

impl From<BookingError> for DomainError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::AlreadyExists | BookingError::NotCreated => {
                DomainError::Validation(e.to_string())
            }
            BookingError::InvalidTransition { state, action } => DomainError::InvalidState {
                entity: "booking",
                state: state.to_string(),
                action,
            },
        }
    }
}
