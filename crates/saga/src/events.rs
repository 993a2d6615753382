//! Purchase domain events.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::{AggregateId, Money};
use domain::{DomainEvent, ProductId, ProductKind};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::payment::PaymentStatus;
use crate::request::{Attendee, Contact};
use crate::state::PurchaseStatus;

/// Events recorded on a purchase stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PurchaseEvent {
    /// The request passed validation and the purchase was recorded.
    PurchaseStarted(PurchaseStartedData),

    /// A pending booking holds the requested session.
    BookingCreated(BookingCreatedData),

    /// The amount due is fixed, with or without a coupon.
    DiscountApplied(DiscountAppliedData),

    /// The amount due was captured, or there was nothing to capture.
    PaymentCaptured(PaymentCapturedData),

    /// The gateway declined or did not answer in time.
    PaymentFailed(PaymentFailedData),

    PurchaseCompleted(PurchaseCompletedData),

    /// Compensation started after a step failure or a cancellation.
    CompensationStarted(CompensationStartedData),

    CompensationStepCompleted(StepData),

    /// A compensation step failed; the purchase stays compensating.
    CompensationStepFailed(StepFailedData),

    RefundIssued(RefundIssuedData),

    /// Terminal failure, after compensation if any was needed.
    PurchaseFailed(PurchaseFailedData),

    /// A completed purchase was cancelled and compensated.
    PurchaseCancelled(PurchaseCancelledData),
}

impl DomainEvent for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::PurchaseStarted(_) => "PurchaseStarted",
            PurchaseEvent::BookingCreated(_) => "BookingCreated",
            PurchaseEvent::DiscountApplied(_) => "DiscountApplied",
            PurchaseEvent::PaymentCaptured(_) => "PaymentCaptured",
            PurchaseEvent::PaymentFailed(_) => "PaymentFailed",
            PurchaseEvent::PurchaseCompleted(_) => "PurchaseCompleted",
            PurchaseEvent::CompensationStarted(_) => "CompensationStarted",
            PurchaseEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            PurchaseEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            PurchaseEvent::RefundIssued(_) => "RefundIssued",
            PurchaseEvent::PurchaseFailed(_) => "PurchaseFailed",
            PurchaseEvent::PurchaseCancelled(_) => "PurchaseCancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseStartedData {
    pub purchase_id: AggregateId,
    pub product_id: ProductId,
    pub product_name: String,
    pub kind: ProductKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub attendees: Vec<Attendee>,
    pub contact: Contact,
    /// Normalised upper-case code, if the request carried one.
    pub coupon_code: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCreatedData {
    pub booking_id: AggregateId,
    pub workshop_id: String,
    /// Base price times attendees, before any discount.
    pub total_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountAppliedData {
    pub coupon_code: Option<String>,
    pub discount_amount: Money,
    pub amount_due: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    /// None when the amount due was zero and the gateway was not called.
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    pub receipt_url: Option<String>,
    pub paid_amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseCompletedData {
    pub confirmation_number: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationStartedData {
    /// `Failed` or `Cancelled`.
    pub target: PurchaseStatus,
    /// The step that failed, or the reason compensation was requested.
    pub from_step: String,
    pub reason: String,
    pub kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundIssuedData {
    pub refund_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseFailedData {
    pub reason: String,
    pub kind: Option<ErrorKind>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseCancelledData {
    pub cancelled_at: DateTime<Utc>,
}

// Convenience constructors
impl PurchaseEvent {
    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        PurchaseEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        PurchaseEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    pub fn refund_issued(refund_id: impl Into<String>, amount: Money) -> Self {
        PurchaseEvent::RefundIssued(RefundIssuedData {
            refund_id: refund_id.into(),
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        assert_eq!(
            PurchaseEvent::compensation_step_completed("cancel_booking").event_type(),
            "CompensationStepCompleted"
        );
        assert_eq!(
            PurchaseEvent::compensation_step_failed("refund_payment", "gateway down").event_type(),
            "CompensationStepFailed"
        );
        assert_eq!(
            PurchaseEvent::refund_issued("re_1", Money::from_dollars(5)).event_type(),
            "RefundIssued"
        );
    }

    #[test]
    fn test_serialization_is_tagged() {
        let event = PurchaseEvent::DiscountApplied(DiscountAppliedData {
            coupon_code: Some("SAVE20".to_string()),
            discount_amount: Money::from_dollars(1200),
            amount_due: Money::from_dollars(4800),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DiscountApplied");
        assert_eq!(json["data"]["coupon_code"], "SAVE20");

        let back: PurchaseEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, PurchaseEvent::DiscountApplied(d) if d.amount_due == Money::from_dollars(4800)));
    }
}
