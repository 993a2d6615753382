//! Booking domain events.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::catalog::ProductId;
use crate::workshop::WorkshopId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BookingEvent {
    /// Availability and capacity checked, seats not yet taken.
    BookingCreated(BookingCreatedData),

    /// Seats claimed on the workshop and the interval occupied.
    BookingConfirmed(BookingConfirmedData),

    BookingCancelled(BookingCancelledData),
}

impl DomainEvent for BookingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::BookingCreated(_) => "BookingCreated",
            BookingEvent::BookingConfirmed(_) => "BookingConfirmed",
            BookingEvent::BookingCancelled(_) => "BookingCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCreatedData {
    pub booking_id: AggregateId,
    pub product_id: ProductId,
    pub workshop_id: WorkshopId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub attendees: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmedData {
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl BookingEvent {
    pub fn booking_confirmed(at: DateTime<Utc>) -> Self {
        BookingEvent::BookingConfirmed(BookingConfirmedData { confirmed_at: at })
    }

    pub fn booking_cancelled(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        BookingEvent::BookingCancelled(BookingCancelledData {
            reason: reason.into(),
            cancelled_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_serialization() {
        let event = BookingEvent::booking_cancelled("payment declined", Utc::now());
        assert_eq!(event.event_type(), "BookingCancelled");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"BookingCancelled\""));

        let back: BookingEvent = serde_json::from_str(&json).unwrap();
        if let BookingEvent::BookingCancelled(data) = back {
            assert_eq!(data.reason, "payment declined");
        } else {
            panic!("Expected BookingCancelled event");
        }
    }
}
