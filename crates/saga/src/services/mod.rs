//! External collaborators and their in-memory implementations.

pub mod gateway;
pub mod notifier;

pub use gateway::{
    CaptureStatus, GatewayCapture, GatewayError, GatewayRefund, InMemoryPaymentGateway,
    PaymentGateway,
};
pub use notifier::{InMemoryNotifier, Notification, Notifier, NotifierError, TracingNotifier};
