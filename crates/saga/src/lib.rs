//! Purchase orchestration for workshop seats and consulting blocks.
//!
//! A purchase runs four steps, each recorded on the purchase's own stream:
//! 1. Create a pending booking
//! 2. Redeem the coupon, if any
//! 3. Capture the amount due
//! 4. Confirm the booking
//!
//! If a step fails after the booking exists, the steps already taken are
//! compensated: the payment is refunded (or a timed-out capture reconciled),
//! the booking cancelled and the coupon use released. A completed purchase
//! can be cancelled the same way.

pub mod admin;
pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod notification;
pub mod payment;
pub mod purchase_flow;
pub mod request;
pub mod services;
pub mod state;

pub use admin::Administration;
pub use aggregate::{Purchase, PurchaseError};
pub use coordinator::PurchaseSaga;
pub use error::{ErrorKind, SagaError};
pub use events::PurchaseEvent;
pub use notification::{NotificationSchedule, NotificationScheduler, ScheduleRequest, Track};
pub use payment::{
    PaymentCoordinator, PaymentRequest, PaymentResult, PaymentSettings, PaymentStatus,
    PaymentTransaction, ReconcileOutcome, RefundResult,
};
pub use request::{Attendee, Contact, PurchaseRequest, PurchaseResult};
pub use services::{
    CaptureStatus, GatewayCapture, GatewayError, GatewayRefund, InMemoryNotifier,
    InMemoryPaymentGateway, Notification, Notifier, NotifierError, PaymentGateway,
    TracingNotifier,
};
pub use state::PurchaseStatus;
