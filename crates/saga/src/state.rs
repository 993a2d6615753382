//! Purchase state machine.

use serde::{Deserialize, Serialize};

/// The state of a purchase in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► BookingCreated ──► DiscountApplied ──► PaymentCaptured ──► Completed
///    │               └────────────────┴──────────────────┴──► Compensating ──► Failed
///    └──► Failed                                  Completed ──► Compensating ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Recorded, no booking yet.
    #[default]
    Pending,

    BookingCreated,

    /// The coupon, if any, has been redeemed and the amount due is fixed.
    DiscountApplied,

    PaymentCaptured,

    /// Booking confirmed and paid (terminal state).
    Completed,

    /// Undoing completed steps; parked here while a step keeps failing.
    Compensating,

    /// A step failed and everything it left behind was undone (terminal state).
    Failed,

    /// A completed purchase was cancelled and refunded (terminal state).
    Cancelled,
}

impl PurchaseStatus {
    /// Returns true while the forward steps are still running.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::Pending
                | PurchaseStatus::BookingCreated
                | PurchaseStatus::DiscountApplied
                | PurchaseStatus::PaymentCaptured
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PurchaseStatus::Completed | PurchaseStatus::Failed | PurchaseStatus::Cancelled
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::BookingCreated => "booking_created",
            PurchaseStatus::DiscountApplied => "discount_applied",
            PurchaseStatus::PaymentCaptured => "payment_captured",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Compensating => "compensating",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
