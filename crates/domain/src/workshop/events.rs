//! Workshop domain events.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::catalog::ProductId;

use super::WorkshopId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkshopEvent {
    /// First booking confirmed for the session.
    WorkshopScheduled(WorkshopScheduledData),

    /// A confirmed booking took seats.
    SeatsClaimed(SeatsClaimedData),

    /// A cancelled booking gave its seats back.
    SeatsReleased(SeatsReleasedData),

    CapacityChanged(CapacityChangedData),

    WorkshopClosed(WorkshopClosedData),
}

impl DomainEvent for WorkshopEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WorkshopEvent::WorkshopScheduled(_) => "WorkshopScheduled",
            WorkshopEvent::SeatsClaimed(_) => "SeatsClaimed",
            WorkshopEvent::SeatsReleased(_) => "SeatsReleased",
            WorkshopEvent::CapacityChanged(_) => "CapacityChanged",
            WorkshopEvent::WorkshopClosed(_) => "WorkshopClosed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopScheduledData {
    pub workshop_id: WorkshopId,
    pub product_id: ProductId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatsClaimedData {
    pub booking_id: AggregateId,
    pub seats: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatsReleasedData {
    pub booking_id: AggregateId,
    pub seats: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityChangedData {
    pub previous: u32,
    pub capacity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopClosedData {
    pub closed_at: DateTime<Utc>,
}

impl WorkshopEvent {
    pub fn seats_claimed(booking_id: AggregateId, seats: u32) -> Self {
        WorkshopEvent::SeatsClaimed(SeatsClaimedData { booking_id, seats })
    }

    pub fn seats_released(booking_id: AggregateId, seats: u32) -> Self {
        WorkshopEvent::SeatsReleased(SeatsReleasedData { booking_id, seats })
    }

    pub fn capacity_changed(previous: u32, capacity: u32) -> Self {
        WorkshopEvent::CapacityChanged(CapacityChangedData { previous, capacity })
    }

    pub fn workshop_closed(at: DateTime<Utc>) -> Self {
        WorkshopEvent::WorkshopClosed(WorkshopClosedData { closed_at: at })
    }
}
