//! Calendar domain events.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::workshop::WorkshopId;

/// Admin-authored range of days on which nothing can be booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarBlockout {
    pub id: AggregateId,
    /// First blocked day, inclusive.
    pub start: NaiveDate,
    /// Last blocked day, inclusive.
    pub end: NaiveDate,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl CalendarBlockout {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start <= end && start <= self.end
    }
}

/// Time taken by a confirmed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupiedInterval {
    pub workshop_id: WorkshopId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl OccupiedInterval {
    /// Half-open overlap: back-to-back sessions do not collide.
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CalendarEvent {
    DateBlocked(CalendarBlockout),

    BlockoutLifted(BlockoutLiftedData),

    IntervalOccupied(IntervalOccupiedData),

    IntervalReleased(IntervalReleasedData),
}

impl DomainEvent for CalendarEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CalendarEvent::DateBlocked(_) => "DateBlocked",
            CalendarEvent::BlockoutLifted(_) => "BlockoutLifted",
            CalendarEvent::IntervalOccupied(_) => "IntervalOccupied",
            CalendarEvent::IntervalReleased(_) => "IntervalReleased",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockoutLiftedData {
    pub blockout_id: AggregateId,
    pub lifted_at: DateTime<Utc>,
}

/// A confirmed booking takes its session's interval. Several bookings of one
/// workshop share the interval; it is freed when the last of them releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalOccupiedData {
    pub booking_id: AggregateId,
    #[serde(flatten)]
    pub interval: OccupiedInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalReleasedData {
    pub workshop_id: WorkshopId,
    pub booking_id: AggregateId,
}

impl CalendarEvent {
    pub fn date_blocked(
        start: NaiveDate,
        end: NaiveDate,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        CalendarEvent::DateBlocked(CalendarBlockout {
            id: AggregateId::new(),
            start,
            end,
            reason: reason.into(),
            created_at: at,
        })
    }

    pub fn blockout_lifted(blockout_id: AggregateId, at: DateTime<Utc>) -> Self {
        CalendarEvent::BlockoutLifted(BlockoutLiftedData {
            blockout_id,
            lifted_at: at,
        })
    }

    pub fn interval_occupied(
        booking_id: AggregateId,
        workshop_id: WorkshopId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        CalendarEvent::IntervalOccupied(IntervalOccupiedData {
            booking_id,
            interval: OccupiedInterval {
                workshop_id,
                start,
                end,
            },
        })
    }

    pub fn interval_released(workshop_id: WorkshopId, booking_id: AggregateId) -> Self {
        CalendarEvent::IntervalReleased(IntervalReleasedData {
            workshop_id,
            booking_id,
        })
    }
}
