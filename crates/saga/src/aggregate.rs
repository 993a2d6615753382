//! Purchase aggregate.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::{AggregateId, Money, StreamId};
use domain::{Aggregate, DomainError, ProductId, ProductKind};
use event_store::Version;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::events::{
    BookingCreatedData, CompensationStartedData, DiscountAppliedData, PaymentCapturedData,
    PaymentFailedData, PurchaseCancelledData, PurchaseCompletedData, PurchaseEvent,
    PurchaseFailedData, PurchaseStartedData,
};
use crate::notification::{ScheduleRequest, Track};
use crate::purchase_flow;
use crate::request::{Attendee, Contact};
use crate::state::PurchaseStatus;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("Purchase already started")]
    AlreadyStarted,

    #[error("Purchase not started")]
    NotStarted,

    #[error("Cannot {action} a purchase in state {status}")]
    InvalidTransition {
        status: PurchaseStatus,
        action: &'static str,
    },
}

impl From<PurchaseError> for DomainError {
    fn from(e: PurchaseError) -> Self {
        match e {
            PurchaseError::AlreadyStarted | PurchaseError::NotStarted => {
                DomainError::Validation(e.to_string())
            }
            PurchaseError::InvalidTransition { status, action } => DomainError::InvalidState {
                entity: "purchase",
                state: status.to_string(),
                action,
            },
        }
    }
}

pub(crate) fn purchase_stream(id: AggregateId) -> StreamId {
    StreamId::of("purchase", id)
}

/// An event-sourced purchase.
///
/// Tracks how far the forward steps got and which compensation steps are
/// done, so an interrupted compensation can be re-run from the journal.
#[derive(Debug, Clone, Default)]
pub struct Purchase {
    started: Option<PurchaseStartedData>,
    version: Version,
    status: PurchaseStatus,
    booking_id: Option<AggregateId>,
    workshop_id: Option<String>,
    total_amount: Money,
    discount_amount: Money,
    amount_due: Money,
    paid_amount: Money,
    refunded_amount: Money,
    refund_ids: Vec<String>,
    payment_id: Option<String>,
    transaction_id: Option<String>,
    receipt_url: Option<String>,
    confirmation_number: Option<String>,
    failure_reason: Option<String>,
    error_kind: Option<ErrorKind>,
    failed_step: Option<String>,
    compensation_target: Option<PurchaseStatus>,
    compensated_steps: Vec<String>,
    completed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl Aggregate for Purchase {
    type Event = PurchaseEvent;
    type Error = PurchaseError;

    fn aggregate_type() -> &'static str {
        purchase_flow::SAGA_TYPE
    }

    fn exists(&self) -> bool {
        self.started.is_some()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PurchaseEvent::PurchaseStarted(data) => {
                self.started = Some(data);
                self.status = PurchaseStatus::Pending;
            }
            PurchaseEvent::BookingCreated(data) => {
                self.booking_id = Some(data.booking_id);
                self.workshop_id = Some(data.workshop_id);
                self.total_amount = data.total_amount;
                self.amount_due = data.total_amount;
                self.status = PurchaseStatus::BookingCreated;
            }
            PurchaseEvent::DiscountApplied(data) => {
                self.discount_amount = data.discount_amount;
                self.amount_due = data.amount_due;
                self.status = PurchaseStatus::DiscountApplied;
            }
            PurchaseEvent::PaymentCaptured(data) => {
                self.payment_id = data.payment_id;
                self.transaction_id = data.transaction_id;
                self.receipt_url = data.receipt_url;
                self.paid_amount = data.paid_amount;
                self.status = PurchaseStatus::PaymentCaptured;
            }
            PurchaseEvent::PaymentFailed(data) => {
                self.payment_id = Some(data.payment_id);
            }
            PurchaseEvent::PurchaseCompleted(data) => {
                self.confirmation_number = Some(data.confirmation_number);
                self.completed_at = Some(data.completed_at);
                self.status = PurchaseStatus::Completed;
            }
            PurchaseEvent::CompensationStarted(data) => {
                self.compensation_target = Some(data.target);
                self.failed_step = Some(data.from_step);
                self.failure_reason = Some(data.reason);
                self.error_kind = data.kind;
                self.status = PurchaseStatus::Compensating;
            }
            PurchaseEvent::CompensationStepCompleted(data) => {
                self.compensated_steps.push(data.step_name);
            }
            PurchaseEvent::CompensationStepFailed(_) => {
                // Retried by the compensation sweep
            }
            PurchaseEvent::RefundIssued(data) => {
                self.refunded_amount += data.amount;
                self.refund_ids.push(data.refund_id);
            }
            PurchaseEvent::PurchaseFailed(data) => {
                self.failure_reason = Some(data.reason);
                self.error_kind = data.kind.or(self.error_kind);
                self.closed_at = Some(data.failed_at);
                self.status = PurchaseStatus::Failed;
            }
            PurchaseEvent::PurchaseCancelled(data) => {
                self.closed_at = Some(data.cancelled_at);
                self.status = PurchaseStatus::Cancelled;
            }
        }
    }
}

// Query methods
impl Purchase {
    pub fn id(&self) -> Option<AggregateId> {
        self.started.as_ref().map(|s| s.purchase_id)
    }

    pub fn status(&self) -> PurchaseStatus {
        self.status
    }

    pub fn product_id(&self) -> Option<&ProductId> {
        self.started.as_ref().map(|s| &s.product_id)
    }

    pub fn product_name(&self) -> Option<&str> {
        self.started.as_ref().map(|s| s.product_name.as_str())
    }

    pub fn kind(&self) -> Option<ProductKind> {
        self.started.as_ref().map(|s| s.kind)
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.started.as_ref().map(|s| s.start)
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.started.as_ref().map(|s| s.end)
    }

    pub fn attendees(&self) -> &[Attendee] {
        self.started
            .as_ref()
            .map(|s| s.attendees.as_slice())
            .unwrap_or_default()
    }

    pub fn contact(&self) -> Option<&Contact> {
        self.started.as_ref().map(|s| &s.contact)
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.started.as_ref().and_then(|s| s.coupon_code.as_deref())
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started.as_ref().map(|s| s.started_at)
    }

    pub fn booking_id(&self) -> Option<AggregateId> {
        self.booking_id
    }

    pub fn workshop_id(&self) -> Option<&str> {
        self.workshop_id.as_deref()
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn discount_amount(&self) -> Money {
        self.discount_amount
    }

    pub fn amount_due(&self) -> Money {
        self.amount_due
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.transaction_id.as_deref()
    }

    pub fn receipt_url(&self) -> Option<&str> {
        self.receipt_url.as_deref()
    }

    pub fn confirmation_number(&self) -> Option<&str> {
        self.confirmation_number.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    /// `Failed` or `Cancelled` once compensation has started.
    pub fn compensation_target(&self) -> Option<PurchaseStatus> {
        self.compensation_target
    }

    pub fn has_compensated(&self, step: &str) -> bool {
        self.compensated_steps.iter().any(|s| s == step)
    }

    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// What the notification scheduler needs to plan follow-up emails.
    pub fn follow_up(&self) -> Option<ScheduleRequest> {
        let started = self.started.as_ref()?;
        Some(ScheduleRequest {
            purchase_id: started.purchase_id,
            track: Track::for_kind(started.kind),
            recipient_name: started.contact.name.clone(),
            recipient_email: started.contact.email.clone(),
            product_name: started.product_name.clone(),
            start: started.start,
            end: started.end,
            purchased_at: self.completed_at.unwrap_or(started.started_at),
        })
    }
}

// Command methods (return events)
impl Purchase {
    pub fn begin(&self, data: PurchaseStartedData) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        if self.exists() {
            return Err(PurchaseError::AlreadyStarted);
        }
        Ok(vec![PurchaseEvent::PurchaseStarted(data)])
    }

    pub fn record_booking(
        &self,
        booking_id: AggregateId,
        workshop_id: String,
        total_amount: Money,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::Pending, "record a booking for")?;
        Ok(vec![PurchaseEvent::BookingCreated(BookingCreatedData {
            booking_id,
            workshop_id,
            total_amount,
        })])
    }

    pub fn apply_discount(
        &self,
        coupon_code: Option<String>,
        discount_amount: Money,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::BookingCreated, "apply a discount to")?;
        let discount_amount = discount_amount.min(self.total_amount);
        Ok(vec![PurchaseEvent::DiscountApplied(DiscountAppliedData {
            coupon_code,
            discount_amount,
            amount_due: self.total_amount.saturating_sub(discount_amount),
        })])
    }

    pub fn record_capture(
        &self,
        payment_id: Option<String>,
        transaction_id: Option<String>,
        receipt_url: Option<String>,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::DiscountApplied, "capture payment for")?;
        let paid_amount = if payment_id.is_some() {
            self.amount_due
        } else {
            Money::zero()
        };
        Ok(vec![PurchaseEvent::PaymentCaptured(PaymentCapturedData {
            payment_id,
            transaction_id,
            receipt_url,
            paid_amount,
        })])
    }

    pub fn record_payment_failure(
        &self,
        data: PaymentFailedData,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::DiscountApplied, "record a payment failure for")?;
        Ok(vec![PurchaseEvent::PaymentFailed(data)])
    }

    pub fn complete(
        &self,
        confirmation_number: String,
        at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::PaymentCaptured, "complete")?;
        Ok(vec![PurchaseEvent::PurchaseCompleted(PurchaseCompletedData {
            confirmation_number,
            completed_at: at,
        })])
    }

    /// Fails a purchase that never got a booking; nothing needs undoing.
    pub fn reject(
        &self,
        reason: String,
        kind: ErrorKind,
        at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::Pending, "reject")?;
        Ok(vec![PurchaseEvent::PurchaseFailed(PurchaseFailedData {
            reason,
            kind: Some(kind),
            failed_at: at,
        })])
    }

    /// Starts compensation towards `target`.
    ///
    /// In-flight purchases compensate towards `Failed`, completed ones towards
    /// `Cancelled`. Repeating the request for the same target changes nothing.
    pub fn begin_compensation(
        &self,
        target: PurchaseStatus,
        from_step: &str,
        reason: String,
        kind: Option<ErrorKind>,
        at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        if !self.exists() {
            return Err(PurchaseError::NotStarted);
        }
        let allowed = match (self.status, target) {
            (PurchaseStatus::Compensating, t) => {
                if self.compensation_target == Some(t) {
                    return Ok(vec![]);
                }
                false
            }
            (s, PurchaseStatus::Failed) => s.is_in_flight(),
            (PurchaseStatus::Completed, PurchaseStatus::Cancelled) => true,
            _ => false,
        };
        if !allowed {
            return Err(PurchaseError::InvalidTransition {
                status: self.status,
                action: "compensate",
            });
        }
        Ok(vec![PurchaseEvent::CompensationStarted(
            CompensationStartedData {
                target,
                from_step: from_step.to_string(),
                reason,
                kind,
                started_at: at,
            },
        )])
    }

    /// Records the outcome of one compensation step. A step already recorded
    /// as done is not recorded again.
    pub fn record_compensation_step(
        &self,
        step: &str,
        outcome: &Result<(), String>,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::Compensating, "record compensation for")?;
        if self.has_compensated(step) {
            return Ok(vec![]);
        }
        Ok(vec![match outcome {
            Ok(()) => PurchaseEvent::compensation_step_completed(step),
            Err(error) => PurchaseEvent::compensation_step_failed(step, error.clone()),
        }])
    }

    pub fn record_refund(
        &self,
        refund_id: &str,
        amount: Money,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::Compensating, "record a refund for")?;
        if self.refund_ids.iter().any(|r| r == refund_id) {
            return Ok(vec![]);
        }
        Ok(vec![PurchaseEvent::refund_issued(refund_id, amount)])
    }

    /// Ends compensation in its recorded target state.
    pub fn finish_compensation(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<PurchaseEvent>, PurchaseError> {
        self.require(PurchaseStatus::Compensating, "finish compensation for")?;
        let event = match self.compensation_target {
            Some(PurchaseStatus::Cancelled) => {
                PurchaseEvent::PurchaseCancelled(PurchaseCancelledData { cancelled_at: at })
            }
            _ => PurchaseEvent::PurchaseFailed(PurchaseFailedData {
                reason: self
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "compensated".to_string()),
                kind: self.error_kind,
                failed_at: at,
            }),
        };
        Ok(vec![event])
    }

    fn require(&self, status: PurchaseStatus, action: &'static str) -> Result<(), PurchaseError> {
        if !self.exists() {
            return Err(PurchaseError::NotStarted);
        }
        if self.status != status {
            return Err(PurchaseError::InvalidTransition {
                status: self.status,
                action,
            });
        }
        Ok(())
    }
}
