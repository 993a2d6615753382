//! Purchase input and output types.

use chrono::NaiveDateTime;
use common::{AggregateId, Money};
use domain::{CouponCode, ProductId};
use serde::{Deserialize, Serialize};

use crate::aggregate::Purchase;
use crate::error::{ErrorKind, SagaError};
use crate::state::PurchaseStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub name: String,
    pub email: String,
}

/// The person who receives confirmations and follow-up emails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub product_id: ProductId,
    pub start: NaiveDateTime,
    pub attendees: Vec<Attendee>,
    pub contact: Contact,
    #[serde(default)]
    pub coupon_code: Option<String>,
    /// Opaque card token handed to the payment gateway.
    pub payment_source: String,
}

impl PurchaseRequest {
    /// Rejects malformed requests before anything is recorded. Returns the
    /// normalised coupon code, if one was given.
    pub fn validate(&self) -> Result<Option<CouponCode>, SagaError> {
        if self.attendees.is_empty() {
            return Err(SagaError::Validation(
                "at least one attendee is required".to_string(),
            ));
        }
        for attendee in &self.attendees {
            if attendee.name.trim().is_empty() {
                return Err(SagaError::Validation(
                    "attendee name is required".to_string(),
                ));
            }
            check_email(&attendee.email)?;
        }
        if self.contact.name.trim().is_empty() {
            return Err(SagaError::Validation(
                "contact name is required".to_string(),
            ));
        }
        check_email(&self.contact.email)?;
        if self.payment_source.trim().is_empty() {
            return Err(SagaError::Validation(
                "payment source is required".to_string(),
            ));
        }

        match self.coupon_code.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(code) => CouponCode::parse(code)
                .map(Some)
                .map_err(|e| SagaError::Validation(e.to_string())),
        }
    }

    pub fn attendee_count(&self) -> u32 {
        u32::try_from(self.attendees.len()).unwrap_or(u32::MAX)
    }
}

fn check_email(email: &str) -> Result<(), SagaError> {
    let valid = match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SagaError::Validation(format!(
            "invalid email address: {email:?}"
        )))
    }
}

/// Outcome of a purchase as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub purchase_id: AggregateId,
    pub status: PurchaseStatus,
    pub booking_id: Option<AggregateId>,
    pub payment_id: Option<String>,
    pub total_amount: Money,
    pub discount_amount: Money,
    pub amount_charged: Money,
    pub refunded_amount: Money,
    pub confirmation_number: Option<String>,
    pub receipt_url: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl PurchaseResult {
    pub fn is_completed(&self) -> bool {
        self.status == PurchaseStatus::Completed
    }
}

impl From<&Purchase> for PurchaseResult {
    fn from(purchase: &Purchase) -> Self {
        Self {
            purchase_id: purchase.id().unwrap_or_default(),
            status: purchase.status(),
            booking_id: purchase.booking_id(),
            payment_id: purchase.payment_id().map(str::to_string),
            total_amount: purchase.total_amount(),
            discount_amount: purchase.discount_amount(),
            amount_charged: purchase.paid_amount(),
            refunded_amount: purchase.refunded_amount(),
            confirmation_number: purchase.confirmation_number().map(str::to_string),
            receipt_url: purchase.receipt_url().map(str::to_string),
            error_message: purchase.failure_reason().map(str::to_string),
            error_kind: purchase.error_kind(),
        }
    }
}
