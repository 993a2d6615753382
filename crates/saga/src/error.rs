//! Saga error types.

use common::AggregateId;
use domain::DomainError;
use event_store::EventStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::{GatewayError, NotifierError};

/// Coarse classification of a failure, stable enough for callers to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Capacity,
    PaymentDeclined,
    GatewayTimeout,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Capacity => "capacity",
            ErrorKind::PaymentDeclined => "payment_declined",
            ErrorKind::GatewayTimeout => "gateway_timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during purchase orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Malformed request, rejected before anything is recorded.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Purchase not found: {0}")]
    PurchaseNotFound(AggregateId),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Notification schedule not found for purchase {0}")]
    ScheduleNotFound(AggregateId),

    #[error("Cannot {action} {entity} in state {state}")]
    InvalidState {
        entity: &'static str,
        state: String,
        action: &'static str,
    },

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// The gateway did not answer in time, or could not be reached.
    #[error("Payment gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Refund of payment {payment_id} failed: {reason}")]
    RefundFailed { payment_id: String, reason: String },

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Validation(_) => ErrorKind::Validation,
            SagaError::PurchaseNotFound(_)
            | SagaError::PaymentNotFound(_)
            | SagaError::ScheduleNotFound(_) => ErrorKind::NotFound,
            SagaError::InvalidState { .. } => ErrorKind::Conflict,
            SagaError::PaymentDeclined(_) => ErrorKind::PaymentDeclined,
            SagaError::GatewayTimeout(_) => ErrorKind::GatewayTimeout,
            SagaError::RefundFailed { .. }
            | SagaError::Gateway(_)
            | SagaError::Notifier(_)
            | SagaError::Serialization(_) => ErrorKind::Internal,
            SagaError::EventStore(e) if e.is_conflict() => ErrorKind::Conflict,
            SagaError::EventStore(_) => ErrorKind::Internal,
            SagaError::Domain(e) => domain_kind(e),
        }
    }
}

fn domain_kind(e: &DomainError) -> ErrorKind {
    match e {
        DomainError::Validation(_)
        | DomainError::ProductNotFound(_)
        | DomainError::CouponInvalid { .. } => ErrorKind::Validation,
        DomainError::CapacityExceeded { .. } | DomainError::WorkshopClosed(_) => {
            ErrorKind::Capacity
        }
        DomainError::DateUnavailable(_)
        | DomainError::SlotUnavailable(_)
        | DomainError::CouponExists(_)
        | DomainError::InvalidState { .. } => ErrorKind::Conflict,
        DomainError::BookingNotFound(_)
        | DomainError::WorkshopNotFound(_)
        | DomainError::BlockoutNotFound(_)
        | DomainError::CouponNotFound(_) => ErrorKind::NotFound,
        DomainError::EventStore(e) if e.is_conflict() => ErrorKind::Conflict,
        DomainError::EventStore(_) | DomainError::Serialization(_) => ErrorKind::Internal,
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
