//! Domain layer for workshop and consulting bookings.
//!
//! Every consistency boundary is an event-sourced aggregate on its own stream:
//! - `Calendar`: blockouts and the intervals taken by confirmed sessions
//! - `Workshop`: the seat counter of one session
//! - `Booking`: a reservation moving Pending, Confirmed, Cancelled
//! - `Coupon`: a discount code and its live redemptions
//!
//! The services (`AvailabilityEngine`, `BookingRegistry`, `CouponLedger`)
//! decide commands against replayed state and append with the stream version
//! they decided on.

pub mod aggregate;
pub mod booking;
pub mod calendar;
pub mod catalog;
pub mod command;
pub mod coupon;
pub mod error;
pub mod workshop;

pub use aggregate::{Aggregate, DomainEvent};
pub use booking::{Booking, BookingError, BookingEvent, BookingRegistry, BookingStatus, NewBooking};
pub use calendar::{
    AvailabilityEngine, BusinessHours, Calendar, CalendarBlockout, CalendarError, CalendarEvent,
    Slot,
};
pub use catalog::{Catalog, Product, ProductId, ProductKind};
pub use command::{CommandHandler, CommandResult, RetryPolicy};
pub use coupon::{
    Coupon, CouponCode, CouponDefinition, CouponError, CouponEvent, CouponLedger, CouponRejection,
    CouponUsage, CouponValidation, Discount,
};
pub use error::DomainError;
pub use workshop::{SessionPlan, Workshop, WorkshopError, WorkshopEvent, WorkshopId, WorkshopStatus};
