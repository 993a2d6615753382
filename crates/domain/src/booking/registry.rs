//! Booking registry: creates, confirms and cancels bookings against the
//! calendar and the per-session seat counters.

use std::sync::Arc;

use chrono::NaiveDateTime;
use common::{AggregateId, SharedClock};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::calendar::AvailabilityEngine;
use crate::catalog::{Catalog, Product, ProductId, ProductKind};
use crate::command::CommandHandler;
use crate::error::DomainError;
use crate::workshop::{SessionPlan, Workshop, WorkshopId};

use super::{Booking, BookingCreatedData, BookingStatus, booking_stream};

/// Input of [`BookingRegistry::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub product_id: ProductId,
    pub start: NaiveDateTime,
    pub attendees: u32,
}

/// Owns bookings and the seat counter of every workshop session.
///
/// Creating a booking only checks availability. Seats are taken on
/// confirmation, with the capacity check and the increment decided against
/// the same workshop version.
pub struct BookingRegistry<S: EventStore + Clone> {
    bookings: CommandHandler<S, Booking>,
    workshops: CommandHandler<S, Workshop>,
    availability: Arc<AvailabilityEngine<S>>,
    catalog: Arc<Catalog>,
    clock: SharedClock,
}

impl<S: EventStore + Clone> BookingRegistry<S> {
    pub fn new(
        store: S,
        availability: Arc<AvailabilityEngine<S>>,
        catalog: Arc<Catalog>,
        clock: SharedClock,
    ) -> Self {
        Self {
            bookings: CommandHandler::new(store.clone()),
            workshops: CommandHandler::new(store),
            availability,
            catalog,
            clock,
        }
    }

    pub fn availability(&self) -> &Arc<AvailabilityEngine<S>> {
        &self.availability
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Records a pending booking after checking the product, the calendar and
    /// the session's remaining seats. Nothing is written on failure.
    #[tracing::instrument(skip(self), fields(product = %request.product_id))]
    pub async fn create(&self, request: &NewBooking) -> Result<Booking, DomainError> {
        if request.attendees == 0 {
            return Err(DomainError::Validation(
                "at least one attendee is required".to_string(),
            ));
        }
        let product = self.product(&request.product_id)?;
        let now = self.clock.now().naive_utc();
        if request.start <= now {
            return Err(DomainError::Validation(format!(
                "start {} is not in the future",
                request.start
            )));
        }

        let start = request.start;
        let end = product.session_end(start);
        let workshop_id = WorkshopId::for_session(&product.id, start);

        let calendar = self.availability.calendar().await?;
        if let Some(day) = product
            .session_days(start)
            .into_iter()
            .find(|d| calendar.is_blocked(*d))
        {
            return Err(DomainError::DateUnavailable(day));
        }

        let window_free = match product.kind {
            ProductKind::Consulting { .. } => {
                self.availability.is_window_available(start, end).await?
            }
            ProductKind::Workshop { .. } => {
                self.availability.is_free_for(&workshop_id, start, end).await?
            }
        };
        if !window_free {
            return Err(DomainError::SlotUnavailable(format!(
                "{start} to {end} is not available"
            )));
        }

        let available = match self.workshops.load_existing(&workshop_id.stream_id()).await? {
            Some(workshop) if workshop.is_closed() => {
                return Err(DomainError::WorkshopClosed(workshop_id.to_string()));
            }
            Some(workshop) => workshop.remaining(),
            None => product.capacity,
        };
        if request.attendees > available {
            return Err(DomainError::CapacityExceeded {
                requested: request.attendees,
                available,
            });
        }

        let booking_id = AggregateId::new();
        let data = BookingCreatedData {
            booking_id,
            product_id: product.id.clone(),
            workshop_id,
            start,
            end,
            attendees: request.attendees,
            created_at: self.clock.now(),
        };
        let result = self
            .bookings
            .execute(&booking_stream(booking_id), |booking| booking.create(data))
            .await?;

        tracing::info!(%booking_id, attendees = request.attendees, "booking created");
        metrics::counter!("bookings_created_total").increment(1);
        Ok(result.aggregate)
    }

    /// Claims the booking's seats, occupies its interval and marks it
    /// confirmed. Confirming a confirmed booking changes nothing.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, booking_id: AggregateId) -> Result<Booking, DomainError> {
        let booking = self.get_booking(booking_id).await?;
        match booking.status() {
            BookingStatus::Confirmed => return Ok(booking),
            BookingStatus::Cancelled => {
                return Err(DomainError::InvalidState {
                    entity: "booking",
                    state: booking.status().to_string(),
                    action: "confirm",
                });
            }
            BookingStatus::Pending => {}
        }

        let details = booking
            .details()
            .cloned()
            .ok_or(DomainError::BookingNotFound(booking_id))?;
        let product = self.product(&details.product_id)?;
        let plan = SessionPlan {
            workshop_id: details.workshop_id.clone(),
            product_id: details.product_id.clone(),
            start: details.start,
            end: details.end,
            capacity: product.capacity,
        };

        self.workshops
            .execute_with_retry(&plan.workshop_id.stream_id(), |workshop| {
                workshop.claim_seats(&plan, booking_id, details.attendees)
            })
            .await?;

        if let Err(e) = self
            .availability
            .occupy(&plan.workshop_id, booking_id, plan.start, plan.end)
            .await
        {
            self.release_seats(booking_id, &plan.workshop_id).await?;
            return Err(e);
        }

        let at = self.clock.now();
        let confirmed = self
            .bookings
            .execute_with_retry(&booking_stream(booking_id), |booking| booking.confirm(at))
            .await;

        match confirmed {
            Ok(result) => {
                tracing::info!(%booking_id, workshop = %plan.workshop_id, "booking confirmed");
                metrics::counter!("bookings_confirmed_total").increment(1);
                Ok(result.aggregate)
            }
            Err(e) => {
                // Cancelled while the seats were being claimed.
                self.release_seats(booking_id, &plan.workshop_id).await?;
                Err(e)
            }
        }
    }

    /// Releases whatever the booking holds and marks it cancelled.
    ///
    /// Safe to repeat: seats are released at most once per booking and a
    /// cancelled booking stays as it is.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, booking_id: AggregateId, reason: &str) -> Result<Booking, DomainError> {
        let booking = self.get_booking(booking_id).await?;
        if let Some(workshop_id) = booking.workshop_id() {
            self.release_seats(booking_id, workshop_id).await?;
        }

        let at = self.clock.now();
        let result = self
            .bookings
            .execute_with_retry(&booking_stream(booking_id), |booking| {
                booking.cancel(reason, at)
            })
            .await?;

        if !result.events.is_empty() {
            tracing::info!(%booking_id, reason, "booking cancelled");
            metrics::counter!("bookings_cancelled_total").increment(1);
        }
        Ok(result.aggregate)
    }

    pub async fn get_booking(&self, booking_id: AggregateId) -> Result<Booking, DomainError> {
        self.bookings
            .load_existing(&booking_stream(booking_id))
            .await?
            .ok_or(DomainError::BookingNotFound(booking_id))
    }

    pub async fn get_workshop(&self, workshop_id: &WorkshopId) -> Result<Workshop, DomainError> {
        self.workshops
            .load_existing(&workshop_id.stream_id())
            .await?
            .ok_or_else(|| DomainError::WorkshopNotFound(workshop_id.to_string()))
    }

    /// Changes the seat count of a scheduled session.
    #[tracing::instrument(skip(self))]
    pub async fn set_workshop_capacity(
        &self,
        workshop_id: &WorkshopId,
        capacity: u32,
    ) -> Result<Workshop, DomainError> {
        if capacity == 0 {
            return Err(DomainError::Validation(
                "capacity must be at least 1".to_string(),
            ));
        }
        self.get_workshop(workshop_id).await?;

        let result = self
            .workshops
            .execute_with_retry(&workshop_id.stream_id(), |workshop| {
                workshop.change_capacity(capacity)
            })
            .await?;
        tracing::info!(workshop = %workshop_id, capacity, "workshop capacity changed");
        Ok(result.aggregate)
    }

    /// Stops new bookings for a session.
    #[tracing::instrument(skip(self))]
    pub async fn close_workshop(&self, workshop_id: &WorkshopId) -> Result<Workshop, DomainError> {
        self.get_workshop(workshop_id).await?;

        let at = self.clock.now();
        let result = self
            .workshops
            .execute_with_retry(&workshop_id.stream_id(), |workshop| workshop.close(at))
            .await?;
        Ok(result.aggregate)
    }

    /// Gives back a booking's seats and its hold on the session's interval.
    ///
    /// The calendar frees the interval itself once its last hold is dropped,
    /// so a booking confirmed concurrently keeps the session on the calendar.
    async fn release_seats(
        &self,
        booking_id: AggregateId,
        workshop_id: &WorkshopId,
    ) -> Result<(), DomainError> {
        self.workshops
            .execute_with_retry(&workshop_id.stream_id(), |workshop| {
                workshop.release_seats(booking_id)
            })
            .await?;
        self.availability.release(workshop_id, booking_id).await
    }

    fn product(&self, id: &ProductId) -> Result<&Product, DomainError> {
        self.catalog
            .get(id)
            .ok_or_else(|| DomainError::ProductNotFound(id.to_string()))
    }
}
