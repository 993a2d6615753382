//! Workshop aggregate: the seat counter of one session.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::catalog::ProductId;

use super::{WorkshopError, WorkshopEvent, WorkshopId, WorkshopScheduledData};

/// Session details needed to schedule a workshop on its first claim.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub workshop_id: WorkshopId,
    pub product_id: ProductId,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkshopStatus {
    Open,
    Full,
    Closed,
}

impl WorkshopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkshopStatus::Open => "open",
            WorkshopStatus::Full => "full",
            WorkshopStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for WorkshopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attendance of one session. `attendees <= capacity` holds after every event.
#[derive(Debug, Clone, Default)]
pub struct Workshop {
    id: Option<WorkshopId>,
    version: Version,
    product_id: Option<ProductId>,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    capacity: u32,
    claims: HashMap<AggregateId, u32>,
    closed_at: Option<DateTime<Utc>>,
}

impl Aggregate for Workshop {
    type Event = WorkshopEvent;
    type Error = WorkshopError;

    fn aggregate_type() -> &'static str {
        "Workshop"
    }

    fn exists(&self) -> bool {
        self.id.is_some()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            WorkshopEvent::WorkshopScheduled(data) => {
                self.id = Some(data.workshop_id);
                self.product_id = Some(data.product_id);
                self.start = Some(data.start);
                self.end = Some(data.end);
                self.capacity = data.capacity;
            }
            WorkshopEvent::SeatsClaimed(data) => {
                *self.claims.entry(data.booking_id).or_default() += data.seats;
            }
            WorkshopEvent::SeatsReleased(data) => {
                self.claims.remove(&data.booking_id);
            }
            WorkshopEvent::CapacityChanged(data) => {
                self.capacity = data.capacity;
            }
            WorkshopEvent::WorkshopClosed(data) => {
                self.closed_at = Some(data.closed_at);
            }
        }
    }
}

// Query methods
impl Workshop {
    pub fn id(&self) -> Option<&WorkshopId> {
        self.id.as_ref()
    }

    pub fn product_id(&self) -> Option<&ProductId> {
        self.product_id.as_ref()
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.end
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn attendees(&self) -> u32 {
        self.claims.values().sum()
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.attendees())
    }

    pub fn booking_count(&self) -> usize {
        self.claims.len()
    }

    pub fn has_claim(&self, booking_id: &AggregateId) -> bool {
        self.claims.contains_key(booking_id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn status(&self) -> WorkshopStatus {
        if self.is_closed() {
            WorkshopStatus::Closed
        } else if self.remaining() == 0 {
            WorkshopStatus::Full
        } else {
            WorkshopStatus::Open
        }
    }
}

// Command methods (return events)
impl Workshop {
    /// Takes `seats` for a booking, scheduling the session on first use.
    ///
    /// A booking that already holds seats gets no new events.
    pub fn claim_seats(
        &self,
        plan: &SessionPlan,
        booking_id: AggregateId,
        seats: u32,
    ) -> Result<Vec<WorkshopEvent>, WorkshopError> {
        let mut events = Vec::new();
        let (capacity, attendees) = if self.exists() {
            if self.has_claim(&booking_id) {
                return Ok(events);
            }
            if self.is_closed() {
                return Err(WorkshopError::Closed(plan.workshop_id.clone()));
            }
            (self.capacity, self.attendees())
        } else {
            events.push(WorkshopEvent::WorkshopScheduled(WorkshopScheduledData {
                workshop_id: plan.workshop_id.clone(),
                product_id: plan.product_id.clone(),
                start: plan.start,
                end: plan.end,
                capacity: plan.capacity,
            }));
            (plan.capacity, 0)
        };

        let available = capacity.saturating_sub(attendees);
        if seats > available {
            return Err(WorkshopError::CapacityExceeded {
                requested: seats,
                available,
            });
        }

        events.push(WorkshopEvent::seats_claimed(booking_id, seats));
        Ok(events)
    }

    /// Gives back a booking's seats. No-op if it holds none.
    pub fn release_seats(
        &self,
        booking_id: AggregateId,
    ) -> Result<Vec<WorkshopEvent>, WorkshopError> {
        match self.claims.get(&booking_id) {
            Some(&seats) => Ok(vec![WorkshopEvent::seats_released(booking_id, seats)]),
            None => Ok(vec![]),
        }
    }

    pub fn change_capacity(&self, capacity: u32) -> Result<Vec<WorkshopEvent>, WorkshopError> {
        self.require_scheduled()?;
        let attendees = self.attendees();
        if capacity < attendees {
            return Err(WorkshopError::CapacityBelowAttendees {
                capacity,
                attendees,
            });
        }
        if capacity == self.capacity {
            return Ok(vec![]);
        }
        Ok(vec![WorkshopEvent::capacity_changed(self.capacity, capacity)])
    }

    /// Stops new claims. Existing bookings keep their seats.
    pub fn close(&self, at: DateTime<Utc>) -> Result<Vec<WorkshopEvent>, WorkshopError> {
        self.require_scheduled()?;
        if self.is_closed() {
            return Ok(vec![]);
        }
        Ok(vec![WorkshopEvent::workshop_closed(at)])
    }

    fn require_scheduled(&self) -> Result<(), WorkshopError> {
        if self.exists() {
            Ok(())
        } else {
            Err(WorkshopError::NotScheduled)
        }
    }
}
