//! Calendar blockouts, business hours and session occupancy.

mod aggregate;
mod events;
mod service;

pub use aggregate::Calendar;
pub use events::{
    BlockoutLiftedData, CalendarBlockout, CalendarEvent, IntervalOccupiedData,
    IntervalReleasedData, OccupiedInterval,
};
pub use service::{AvailabilityEngine, BusinessHours, Slot};

use chrono::NaiveDate;
use common::AggregateId;
use thiserror::Error;

use crate::error::DomainError;
use crate::workshop::WorkshopId;

/// Errors that can occur during calendar operations.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Invalid range: {end} is before {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Blockout not found: {0}")]
    BlockoutNotFound(AggregateId),

    #[error("Session {requested} overlaps session {occupied_by}")]
    Overlap {
        requested: WorkshopId,
        occupied_by: WorkshopId,
    },
}

impl From<CalendarError> for DomainError {
    fn from(e: CalendarError) -> Self {
        match e {
            CalendarError::InvalidRange { .. } => DomainError::Validation(e.to_string()),
            CalendarError::BlockoutNotFound(id) => DomainError::BlockoutNotFound(id),
            CalendarError::Overlap { .. } => DomainError::SlotUnavailable(e.to_string()),
        }
    }
}
