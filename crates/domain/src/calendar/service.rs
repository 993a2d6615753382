//! Availability queries and calendar administration.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use common::{AggregateId, SharedClock, StreamId};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::command::CommandHandler;
use crate::error::DomainError;
use crate::workshop::WorkshopId;

use super::{Calendar, CalendarBlockout, CalendarEvent};

/// Opening hours used for consulting windows and hourly slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub open_hour: u32,
    pub close_hour: u32,
    pub open_on_weekends: bool,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 17,
            open_on_weekends: false,
        }
    }
}

impl BusinessHours {
    pub fn is_open_day(&self, date: NaiveDate) -> bool {
        self.open_on_weekends || !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Returns true if `[start, end)` lies within one open day's hours.
    pub fn contains(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        let midnight = start.date().and_time(NaiveTime::MIN);
        let open = midnight + Duration::hours(i64::from(self.open_hour));
        let close = midnight + Duration::hours(i64::from(self.close_hour.min(24)));
        start < end && self.is_open_day(start.date()) && open <= start && end <= close
    }
}

/// One hour of a day's schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub available: bool,
}

fn calendar_stream() -> StreamId {
    StreamId::new("calendar")
}

/// Resolves whether dates and time windows are bookable.
///
/// Reads replay the calendar stream; writes are optimistic appends to it,
/// retried on conflict.
pub struct AvailabilityEngine<S: EventStore> {
    handler: CommandHandler<S, Calendar>,
    hours: BusinessHours,
    clock: SharedClock,
}

impl<S: EventStore> AvailabilityEngine<S> {
    pub fn new(store: S, hours: BusinessHours, clock: SharedClock) -> Self {
        Self {
            handler: CommandHandler::new(store),
            hours,
            clock,
        }
    }

    pub fn business_hours(&self) -> BusinessHours {
        self.hours
    }

    /// Returns the current calendar state.
    pub async fn calendar(&self) -> Result<Calendar, DomainError> {
        self.handler.load(&calendar_stream()).await
    }

    /// False iff a blockout covers `date`. Applies to every product kind.
    pub async fn is_date_available(&self, date: NaiveDate) -> Result<bool, DomainError> {
        Ok(!self.calendar().await?.is_blocked(date))
    }

    #[tracing::instrument(skip(self))]
    pub async fn block_date(
        &self,
        date: NaiveDate,
        reason: &str,
    ) -> Result<CalendarBlockout, DomainError> {
        self.block_range(date, date, reason).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn block_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        reason: &str,
    ) -> Result<CalendarBlockout, DomainError> {
        let at = self.clock.now();
        let result = self
            .handler
            .execute_with_retry(&calendar_stream(), |calendar| {
                calendar.block(start, end, reason, at)
            })
            .await?;

        match result.events.into_iter().next() {
            Some(CalendarEvent::DateBlocked(blockout)) => {
                tracing::info!(%start, %end, reason, "dates blocked");
                Ok(blockout)
            }
            _ => Err(DomainError::Validation(format!(
                "blocking {start}..{end} produced no blockout"
            ))),
        }
    }

    /// Makes `date` available again, splitting ranges that cover it.
    ///
    /// Returns the number of blockout rows that covered the date.
    #[tracing::instrument(skip(self))]
    pub async fn unblock_date(&self, date: NaiveDate) -> Result<usize, DomainError> {
        let at = self.clock.now();
        let result = self
            .handler
            .execute_with_retry(&calendar_stream(), |calendar| {
                calendar.unblock_date(date, at)
            })
            .await?;

        let lifted = result
            .events
            .iter()
            .filter(|e| matches!(e, CalendarEvent::BlockoutLifted(_)))
            .count();
        tracing::info!(%date, lifted, "date unblocked");
        Ok(lifted)
    }

    /// Removes one blockout row.
    #[tracing::instrument(skip(self))]
    pub async fn unblock(&self, blockout_id: AggregateId) -> Result<(), DomainError> {
        let at = self.clock.now();
        self.handler
            .execute_with_retry(&calendar_stream(), |calendar| {
                calendar.lift(blockout_id, at)
            })
            .await?;
        Ok(())
    }

    /// Blocked days within `[start, end]`, ascending and distinct.
    pub async fn get_blocked_dates(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, DomainError> {
        Ok(self.calendar().await?.blocked_dates(start, end))
    }

    pub async fn list_blockouts(&self) -> Result<Vec<CalendarBlockout>, DomainError> {
        Ok(self.calendar().await?.blockouts())
    }

    /// One-hour slots from `open_hour` to `close_hour` on `date`.
    ///
    /// A slot is unavailable when the date is blocked, when a confirmed
    /// session overlaps it, or when it falls outside business hours.
    pub async fn get_hourly_slots(
        &self,
        date: NaiveDate,
        open_hour: u32,
        close_hour: u32,
    ) -> Result<Vec<Slot>, DomainError> {
        let calendar = self.calendar().await?;
        let blocked = calendar.is_blocked(date);
        let close_hour = close_hour.min(24);

        let slots = (open_hour..close_hour)
            .filter_map(|hour| {
                let start = date.and_hms_opt(hour, 0, 0)?;
                let end = start + Duration::hours(1);
                let available = !blocked
                    && self.hours.contains(start, end)
                    && !calendar.is_occupied(start, end, None);
                Some(Slot {
                    start,
                    end,
                    available,
                })
            })
            .collect();

        Ok(slots)
    }

    /// Returns true if every day of `[start, end)` is free, the window lies
    /// within business hours and no other session takes any of it.
    pub async fn is_window_available(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<bool, DomainError> {
        let calendar = self.calendar().await?;
        Ok(self.hours.contains(start, end)
            && !calendar.is_blocked(start.date())
            && !calendar.is_occupied(start, end, None))
    }

    /// Returns true if no session other than `workshop_id` takes any of
    /// `[start, end)`.
    pub async fn is_free_for(
        &self,
        workshop_id: &WorkshopId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<bool, DomainError> {
        Ok(!self
            .calendar()
            .await?
            .is_occupied(start, end, Some(workshop_id)))
    }

    /// Records that a confirmed booking holds its session's interval.
    /// Idempotent per booking.
    #[tracing::instrument(skip(self))]
    pub async fn occupy(
        &self,
        workshop_id: &WorkshopId,
        booking_id: AggregateId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(), DomainError> {
        self.handler
            .execute_with_retry(&calendar_stream(), |calendar| {
                calendar.occupy(workshop_id, booking_id, start, end)
            })
            .await?;
        Ok(())
    }

    /// Drops a booking's hold on its session's interval. Idempotent.
    #[tracing::instrument(skip(self))]
    pub async fn release(
        &self,
        workshop_id: &WorkshopId,
        booking_id: AggregateId,
    ) -> Result<(), DomainError> {
        self.handler
            .execute_with_retry(&calendar_stream(), |calendar| {
                calendar.release(workshop_id, booking_id)
            })
            .await?;
        Ok(())
    }
}
