//! Calendar aggregate: blockouts and the intervals taken by confirmed sessions.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use common::AggregateId;
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::workshop::WorkshopId;

use super::{CalendarBlockout, CalendarError, CalendarEvent, OccupiedInterval};

/// The single calendar shared by every product.
///
/// All writes go through one stream, so a blockout and a session confirmed
/// for the same day cannot both be decided against stale state.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    version: Version,
    blockouts: HashMap<AggregateId, CalendarBlockout>,
    occupied: HashMap<WorkshopId, OccupiedInterval>,
    /// Confirmed bookings holding each occupied interval.
    holders: HashMap<WorkshopId, HashSet<AggregateId>>,
}

impl Aggregate for Calendar {
    type Event = CalendarEvent;
    type Error = CalendarError;

    fn aggregate_type() -> &'static str {
        "Calendar"
    }

    fn exists(&self) -> bool {
        self.version > Version::initial()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CalendarEvent::DateBlocked(blockout) => {
                self.blockouts.insert(blockout.id, blockout);
            }
            CalendarEvent::BlockoutLifted(data) => {
                self.blockouts.remove(&data.blockout_id);
            }
            CalendarEvent::IntervalOccupied(data) => {
                let workshop_id = data.interval.workshop_id.clone();
                self.holders
                    .entry(workshop_id.clone())
                    .or_default()
                    .insert(data.booking_id);
                self.occupied.entry(workshop_id).or_insert(data.interval);
            }
            CalendarEvent::IntervalReleased(data) => {
                if let Some(holders) = self.holders.get_mut(&data.workshop_id) {
                    holders.remove(&data.booking_id);
                    if holders.is_empty() {
                        self.holders.remove(&data.workshop_id);
                        self.occupied.remove(&data.workshop_id);
                    }
                }
            }
        }
    }
}

// Query methods
impl Calendar {
    /// Returns true if any blockout covers `date`.
    pub fn is_blocked(&self, date: NaiveDate) -> bool {
        self.blockouts.values().any(|b| b.covers(date))
    }

    /// Distinct blocked days within `[start, end]`, ascending.
    pub fn blocked_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = BTreeSet::new();
        for blockout in self.blockouts.values().filter(|b| b.overlaps(start, end)) {
            let from = blockout.start.max(start);
            let to = blockout.end.min(end);
            dates.extend(from.iter_days().take_while(|d| *d <= to));
        }
        dates.into_iter().collect()
    }

    /// Every blockout row, ordered by first day.
    pub fn blockouts(&self) -> Vec<CalendarBlockout> {
        let mut rows: Vec<_> = self.blockouts.values().cloned().collect();
        rows.sort_by(|a, b| a.start.cmp(&b.start).then(a.created_at.cmp(&b.created_at)));
        rows
    }

    /// Returns true if a session other than `except` takes any of `[start, end)`.
    pub fn is_occupied(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        except: Option<&WorkshopId>,
    ) -> bool {
        self.occupied
            .values()
            .filter(|i| Some(&i.workshop_id) != except)
            .any(|i| i.overlaps(start, end))
    }

    pub fn occupied_interval(&self, workshop_id: &WorkshopId) -> Option<&OccupiedInterval> {
        self.occupied.get(workshop_id)
    }

    pub fn is_held_by(&self, workshop_id: &WorkshopId, booking_id: &AggregateId) -> bool {
        self.holders
            .get(workshop_id)
            .is_some_and(|h| h.contains(booking_id))
    }
}

// Command methods (return events)
impl Calendar {
    /// Blocks `[start, end]`. Overlapping earlier rows are kept as they are.
    pub fn block(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        if end < start {
            return Err(CalendarError::InvalidRange { start, end });
        }
        Ok(vec![CalendarEvent::date_blocked(start, end, reason, at)])
    }

    /// Removes one blockout row.
    pub fn lift(
        &self,
        blockout_id: AggregateId,
        at: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        if !self.blockouts.contains_key(&blockout_id) {
            return Err(CalendarError::BlockoutNotFound(blockout_id));
        }
        Ok(vec![CalendarEvent::blockout_lifted(blockout_id, at)])
    }

    /// Makes `date` bookable again without touching any other day.
    ///
    /// Rows covering only `date` are lifted; longer rows are lifted and
    /// re-created around it with the same reason.
    pub fn unblock_date(
        &self,
        date: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let mut events = Vec::new();
        for blockout in self.blockouts().into_iter().filter(|b| b.covers(date)) {
            events.push(CalendarEvent::blockout_lifted(blockout.id, at));
            if blockout.start < date {
                events.push(CalendarEvent::date_blocked(
                    blockout.start,
                    date - Duration::days(1),
                    blockout.reason.clone(),
                    at,
                ));
            }
            if blockout.end > date {
                events.push(CalendarEvent::date_blocked(
                    date + Duration::days(1),
                    blockout.end,
                    blockout.reason.clone(),
                    at,
                ));
            }
        }
        Ok(events)
    }

    /// Records that a confirmed booking holds its session's interval.
    ///
    /// Idempotent per booking. Bookings of the same workshop share one
    /// interval; a different session taking any part of it is an overlap.
    pub fn occupy(
        &self,
        workshop_id: &WorkshopId,
        booking_id: AggregateId,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        if self.is_held_by(workshop_id, &booking_id) {
            return Ok(vec![]);
        }
        if let Some(other) = self
            .occupied
            .values()
            .filter(|i| &i.workshop_id != workshop_id)
            .find(|i| i.overlaps(start, end))
        {
            return Err(CalendarError::Overlap {
                requested: workshop_id.clone(),
                occupied_by: other.workshop_id.clone(),
            });
        }
        Ok(vec![CalendarEvent::interval_occupied(
            booking_id,
            workshop_id.clone(),
            start,
            end,
        )])
    }

    /// Drops a booking's hold. The interval is freed with the last hold.
    /// No-op if the booking holds nothing.
    pub fn release(
        &self,
        workshop_id: &WorkshopId,
        booking_id: AggregateId,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        if !self.is_held_by(workshop_id, &booking_id) {
            return Ok(vec![]);
        }
        Ok(vec![CalendarEvent::interval_released(
            workshop_id.clone(),
            booking_id,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn block(calendar: &mut Calendar, start: NaiveDate, end: NaiveDate) {
        let events = calendar.block(start, end, "Holiday", Utc::now()).unwrap();
        calendar.apply_events(events);
    }

    #[test]
    fn test_block_range_covers_every_day() {
        let mut calendar = Calendar::default();
        block(&mut calendar, day(12, 24), day(12, 26));

        assert!(!calendar.is_blocked(day(12, 23)));
        assert!(calendar.is_blocked(day(12, 24)));
        assert!(calendar.is_blocked(day(12, 25)));
        assert!(calendar.is_blocked(day(12, 26)));
        assert!(!calendar.is_blocked(day(12, 27)));
    }

    #[test]
    fn test_block_rejects_inverted_range() {
        let calendar = Calendar::default();
        let result = calendar.block(day(12, 26), day(12, 24), "Oops", Utc::now());
        assert!(matches!(result, Err(CalendarError::InvalidRange { .. })));
    }

    #[test]
    fn test_blocked_dates_merges_overlapping_rows() {
        let mut calendar = Calendar::default();
        block(&mut calendar, day(12, 20), day(12, 24));
        block(&mut calendar, day(12, 23), day(12, 26));
        block(&mut calendar, day(12, 31), day(12, 31));

        let dates = calendar.blocked_dates(day(12, 22), day(12, 31));
        assert_eq!(
            dates,
            vec![
                day(12, 22),
                day(12, 23),
                day(12, 24),
                day(12, 25),
                day(12, 26),
                day(12, 31)
            ]
        );
    }

    #[test]
    fn test_unblock_date_splits_ranges() {
        let mut calendar = Calendar::default();
        block(&mut calendar, day(12, 20), day(12, 26));
        block(&mut calendar, day(12, 23), day(12, 23));

        let events = calendar.unblock_date(day(12, 23), Utc::now()).unwrap();
        calendar.apply_events(events);

        assert!(!calendar.is_blocked(day(12, 23)));
        assert!(calendar.is_blocked(day(12, 22)));
        assert!(calendar.is_blocked(day(12, 24)));
        assert!(calendar.is_blocked(day(12, 20)));
        assert!(calendar.is_blocked(day(12, 26)));
        assert_eq!(calendar.blockouts().len(), 2);
    }

    #[test]
    fn test_unblock_unblocked_date_is_noop() {
        let calendar = Calendar::default();
        assert!(calendar.unblock_date(day(1, 1), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_lift_unknown_blockout() {
        let calendar = Calendar::default();
        let result = calendar.lift(AggregateId::new(), Utc::now());
        assert!(matches!(result, Err(CalendarError::BlockoutNotFound(_))));
    }

    #[test]
    fn test_occupy_is_idempotent_and_exclusive() {
        let mut calendar = Calendar::default();
        let a = WorkshopId::new("a");
        let b = WorkshopId::new("b");
        let booking = AggregateId::new();
        let nine = day(6, 2).and_hms_opt(9, 0, 0).unwrap();
        let eleven = day(6, 2).and_hms_opt(11, 0, 0).unwrap();
        let ten = day(6, 2).and_hms_opt(10, 0, 0).unwrap();
        let noon = day(6, 2).and_hms_opt(12, 0, 0).unwrap();

        let events = calendar.occupy(&a, booking, nine, eleven).unwrap();
        calendar.apply_events(events);

        assert!(calendar.occupy(&a, booking, nine, eleven).unwrap().is_empty());
        assert!(matches!(
            calendar.occupy(&b, AggregateId::new(), ten, noon),
            Err(CalendarError::Overlap { .. })
        ));
        assert!(calendar.is_occupied(ten, noon, None));
        assert!(!calendar.is_occupied(ten, noon, Some(&a)));

        let events = calendar.release(&a, booking).unwrap();
        calendar.apply_events(events);
        assert!(!calendar.is_occupied(ten, noon, None));
        assert!(calendar.release(&a, booking).unwrap().is_empty());
    }

    #[test]
    fn test_interval_stays_until_last_holder_releases() {
        let mut calendar = Calendar::default();
        let ws = WorkshopId::new("ai-leadership-3day-20250602T0900");
        let first = AggregateId::new();
        let second = AggregateId::new();
        let start = day(6, 2).and_hms_opt(9, 0, 0).unwrap();
        let end = day(6, 4).and_hms_opt(17, 0, 0).unwrap();

        let events = calendar.occupy(&ws, first, start, end).unwrap();
        calendar.apply_events(events);
        let events = calendar.occupy(&ws, second, start, end).unwrap();
        assert_eq!(events.len(), 1);
        calendar.apply_events(events);

        let events = calendar.release(&ws, first).unwrap();
        calendar.apply_events(events);
        assert!(calendar.occupied_interval(&ws).is_some());
        assert!(calendar.is_held_by(&ws, &second));

        let events = calendar.release(&ws, second).unwrap();
        calendar.apply_events(events);
        assert!(calendar.occupied_interval(&ws).is_none());
    }
}
