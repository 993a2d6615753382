//! Booking aggregate.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::catalog::ProductId;
use crate::workshop::WorkshopId;

use super::{BookingCreatedData, BookingError, BookingEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Booking {
    details: Option<BookingCreatedData>,
    status: BookingStatus,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    version: Version,
}

impl Aggregate for Booking {
    type Event = BookingEvent;
    type Error = BookingError;

    fn aggregate_type() -> &'static str {
        "Booking"
    }

    fn exists(&self) -> bool {
        self.details.is_some()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            BookingEvent::BookingCreated(data) => {
                self.details = Some(data);
                self.status = BookingStatus::Pending;
            }
            BookingEvent::BookingConfirmed(data) => {
                self.status = BookingStatus::Confirmed;
                self.confirmed_at = Some(data.confirmed_at);
            }
            BookingEvent::BookingCancelled(data) => {
                self.status = BookingStatus::Cancelled;
                self.cancelled_at = Some(data.cancelled_at);
                self.cancel_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl Booking {
    pub fn details(&self) -> Option<&BookingCreatedData> {
        self.details.as_ref()
    }

    pub fn id(&self) -> Option<AggregateId> {
        self.details.as_ref().map(|d| d.booking_id)
    }

    pub fn product_id(&self) -> Option<&ProductId> {
        self.details.as_ref().map(|d| &d.product_id)
    }

    pub fn workshop_id(&self) -> Option<&WorkshopId> {
        self.details.as_ref().map(|d| &d.workshop_id)
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.details.as_ref().map(|d| d.start)
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.details.as_ref().map(|d| d.end)
    }

    pub fn attendees(&self) -> u32 {
        self.details.as_ref().map_or(0, |d| d.attendees)
    }

    pub fn status(&self) -> BookingStatus {
        self.status
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }
}

// Command methods (return events)
impl Booking {
    pub fn create(&self, data: BookingCreatedData) -> Result<Vec<BookingEvent>, BookingError> {
        if self.exists() {
            return Err(BookingError::AlreadyExists);
        }
        Ok(vec![BookingEvent::BookingCreated(data)])
    }

    /// Pending to Confirmed. Already confirmed is a no-op.
    pub fn confirm(&self, at: DateTime<Utc>) -> Result<Vec<BookingEvent>, BookingError> {
        if !self.exists() {
            return Err(BookingError::NotCreated);
        }
        match self.status {
            BookingStatus::Pending => Ok(vec![BookingEvent::booking_confirmed(at)]),
            BookingStatus::Confirmed => Ok(vec![]),
            BookingStatus::Cancelled => Err(BookingError::InvalidTransition {
                state: self.status,
                action: "confirm",
            }),
        }
    }

    /// Pending or Confirmed to Cancelled. Already cancelled is a no-op.
    pub fn cancel(
        &self,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<BookingEvent>, BookingError> {
        if !self.exists() {
            return Err(BookingError::NotCreated);
        }
        if self.status == BookingStatus::Cancelled {
            return Ok(vec![]);
        }
        Ok(vec![BookingEvent::booking_cancelled(reason, at)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn created() -> Booking {
        let start = NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let product_id = ProductId::new("ai-foundations-1day");
        let data = BookingCreatedData {
            booking_id: AggregateId::new(),
            workshop_id: WorkshopId::for_session(&product_id, start),
            product_id,
            start,
            end: start + Duration::hours(8),
            attendees: 2,
            created_at: Utc::now(),
        };

        let mut booking = Booking::default();
        let events = booking.create(data).unwrap();
        booking.apply_events(events);
        booking
    }

    #[test]
    fn test_create_starts_pending() {
        let booking = created();
        assert!(booking.exists());
        assert_eq!(booking.status(), BookingStatus::Pending);
        assert_eq!(booking.attendees(), 2);
    }

    #[test]
    fn test_create_twice_fails() {
        let booking = created();
        let data = booking.details().unwrap().clone();
        assert!(matches!(
            booking.create(data),
            Err(BookingError::AlreadyExists)
        ));
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let mut booking = created();
        let events = booking.confirm(Utc::now()).unwrap();
        booking.apply_events(events);

        assert_eq!(booking.status(), BookingStatus::Confirmed);
        assert!(booking.confirm(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_booking_cannot_be_confirmed() {
        let mut booking = created();
        let events = booking.cancel("customer request", Utc::now()).unwrap();
        booking.apply_events(events);

        assert_eq!(booking.status(), BookingStatus::Cancelled);
        assert_eq!(booking.cancel_reason(), Some("customer request"));
        assert!(matches!(
            booking.confirm(Utc::now()),
            Err(BookingError::InvalidTransition {
                action: "confirm",
                ..
            })
        ));
        assert!(booking.cancel("again", Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_commands_on_missing_booking() {
        let booking = Booking::default();
        assert!(matches!(
            booking.confirm(Utc::now()),
            Err(BookingError::NotCreated)
        ));
        assert!(matches!(
            booking.cancel("x", Utc::now()),
            Err(BookingError::NotCreated)
        ));
    }
}
