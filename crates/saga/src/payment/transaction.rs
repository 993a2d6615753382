//! Payment transaction aggregate.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money, StreamId};
use domain::{Aggregate, DomainError, DomainEvent};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Declined,
    TimedOut,
    PartiallyRefunded,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Declined => "declined",
            PaymentStatus::TimedOut => "timed_out",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// True while some captured money has not been refunded.
    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::PartiallyRefunded
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields shared by every first event of a payment stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcomeData {
    pub payment_id: String,
    pub idempotency_key: String,
    pub booking_id: AggregateId,
    pub amount: Money,
    pub currency: String,
    pub gateway_transaction_id: Option<String>,
    pub receipt_url: Option<String>,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub refund_id: String,
    pub amount: Money,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentCaptured(PaymentOutcomeData),
    PaymentDeclined(PaymentOutcomeData),
    /// No answer within the timeout. Whether money moved is unknown.
    PaymentTimedOut(PaymentOutcomeData),
    /// A timed-out capture turned out to have landed.
    LateCaptureFound {
        gateway_transaction_id: String,
        amount: Money,
        receipt_url: Option<String>,
    },
    PaymentRefunded(RefundRecord),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCaptured(_) => "PaymentCaptured",
            PaymentEvent::PaymentDeclined(_) => "PaymentDeclined",
            PaymentEvent::PaymentTimedOut(_) => "PaymentTimedOut",
            PaymentEvent::LateCaptureFound { .. } => "LateCaptureFound",
            PaymentEvent::PaymentRefunded(_) => "PaymentRefunded",
        }
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment outcome already recorded")]
    AlreadyRecorded,

    #[error("Payment has not been attempted")]
    NotRecorded,

    #[error("Cannot {action} a payment in state {status}")]
    InvalidTransition {
        status: PaymentStatus,
        action: &'static str,
    },

    #[error("Refund of {requested} exceeds the refundable {refundable}")]
    RefundExceedsCapture { requested: Money, refundable: Money },
}

impl From<PaymentError> for DomainError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::InvalidTransition { status, action } => DomainError::InvalidState {
                entity: "payment",
                state: status.to_string(),
                action,
            },
            other => DomainError::Validation(other.to_string()),
        }
    }
}

/// The single payment attempt of a purchase.
#[derive(Debug, Clone, Default)]
pub struct PaymentTransaction {
    outcome: Option<PaymentOutcomeData>,
    status: Option<PaymentStatus>,
    captured: Money,
    refunds: Vec<RefundRecord>,
    version: Version,
}

impl PaymentTransaction {
    /// Payment ids are derived from the idempotency key, so a retried
    /// request lands on the same stream.
    pub fn id_for(idempotency_key: &str) -> String {
        format!("PAY-{idempotency_key}")
    }

    pub fn stream_for(payment_id: &str) -> StreamId {
        StreamId::of("payment", payment_id)
    }
}

impl Aggregate for PaymentTransaction {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "PaymentTransaction"
    }

    fn exists(&self) -> bool {
        self.outcome.is_some()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PaymentEvent::PaymentCaptured(data) => {
                self.captured = data.amount;
                self.status = Some(PaymentStatus::Completed);
                self.outcome = Some(data);
            }
            PaymentEvent::PaymentDeclined(data) => {
                self.status = Some(PaymentStatus::Declined);
                self.outcome = Some(data);
            }
            PaymentEvent::PaymentTimedOut(data) => {
                self.status = Some(PaymentStatus::TimedOut);
                self.outcome = Some(data);
            }
            PaymentEvent::LateCaptureFound {
                gateway_transaction_id,
                amount,
                receipt_url,
            } => {
                self.captured = amount;
                self.status = Some(PaymentStatus::Completed);
                if let Some(outcome) = self.outcome.as_mut() {
                    outcome.gateway_transaction_id = Some(gateway_transaction_id);
                    outcome.receipt_url = receipt_url;
                }
            }
            PaymentEvent::PaymentRefunded(record) => {
                self.refunds.push(record);
                self.status = Some(if self.refunded() >= self.captured {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::PartiallyRefunded
                });
            }
        }
    }
}

// Query methods
impl PaymentTransaction {
    pub fn payment_id(&self) -> Option<&str> {
        self.outcome.as_ref().map(|o| o.payment_id.as_str())
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.outcome.as_ref().map(|o| o.idempotency_key.as_str())
    }

    pub fn booking_id(&self) -> Option<AggregateId> {
        self.outcome.as_ref().map(|o| o.booking_id)
    }

    pub fn status(&self) -> Option<PaymentStatus> {
        self.status
    }

    /// Amount requested from the gateway.
    pub fn amount(&self) -> Money {
        self.outcome.as_ref().map_or(Money::zero(), |o| o.amount)
    }

    pub fn currency(&self) -> Option<&str> {
        self.outcome.as_ref().map(|o| o.currency.as_str())
    }

    pub fn captured(&self) -> Money {
        self.captured
    }

    pub fn refunded(&self) -> Money {
        self.refunds.iter().map(|r| r.amount).sum()
    }

    pub fn refundable(&self) -> Money {
        self.captured.saturating_sub(self.refunded())
    }

    pub fn refunds(&self) -> &[RefundRecord] {
        &self.refunds
    }

    pub fn gateway_transaction_id(&self) -> Option<&str> {
        self.outcome
            .as_ref()
            .and_then(|o| o.gateway_transaction_id.as_deref())
    }

    pub fn receipt_url(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.receipt_url.as_deref())
    }

    pub fn message(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.message.as_deref())
    }

    pub fn transaction_date(&self) -> Option<DateTime<Utc>> {
        self.outcome.as_ref().map(|o| o.at)
    }
}

// Command methods (return events)
impl PaymentTransaction {
    /// Records the gateway's answer. A payment stream holds exactly one.
    pub fn record(&self, outcome: PaymentEvent) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.exists() {
            return Err(PaymentError::AlreadyRecorded);
        }
        Ok(vec![outcome])
    }

    pub fn record_late_capture(
        &self,
        gateway_transaction_id: String,
        amount: Money,
        receipt_url: Option<String>,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        let status = self.status.ok_or(PaymentError::NotRecorded)?;
        if status != PaymentStatus::TimedOut {
            return Err(PaymentError::InvalidTransition {
                status,
                action: "reconcile",
            });
        }
        Ok(vec![PaymentEvent::LateCaptureFound {
            gateway_transaction_id,
            amount,
            receipt_url,
        }])
    }

    pub fn record_refund(&self, record: RefundRecord) -> Result<Vec<PaymentEvent>, PaymentError> {
        let status = self.status.ok_or(PaymentError::NotRecorded)?;
        if self.refunds.iter().any(|r| r.refund_id == record.refund_id) {
            return Ok(vec![]);
        }
        if !status.is_refundable() {
            return Err(PaymentError::InvalidTransition {
                status,
                action: "refund",
            });
        }
        if record.amount > self.refundable() {
            return Err(PaymentError::RefundExceedsCapture {
                requested: record.amount,
                refundable: self.refundable(),
            });
        }
        Ok(vec![PaymentEvent::PaymentRefunded(record)])
    }
}
