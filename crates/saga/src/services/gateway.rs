//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Completed,
    Declined,
}

/// The gateway's answer to a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCapture {
    pub id: String,
    pub status: CaptureStatus,
    pub amount: Money,
    pub receipt_url: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub capture_id: String,
    pub amount: Money,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("unknown capture {0}")]
    UnknownCapture(String),

    #[error("refund of {requested} exceeds the refundable {refundable}")]
    RefundExceedsCapture { requested: Money, refundable: Money },
}

/// A card processor.
///
/// Captures and refunds carry idempotency keys: repeating a call with the same
/// key returns the first answer and moves no money.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn capture(
        &self,
        amount: Money,
        currency: &str,
        idempotency_key: &str,
        source: &str,
    ) -> Result<GatewayCapture, GatewayError>;

    /// Refunds `amount` of a capture, or whatever is left of it.
    async fn refund(
        &self,
        capture_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<GatewayRefund, GatewayError>;

    /// Looks up the capture made under `idempotency_key`, if any.
    async fn find_capture(&self, idempotency_key: &str)
    -> Result<Option<GatewayCapture>, GatewayError>;
}

#[derive(Debug, Default)]
struct GatewayState {
    captures: HashMap<String, GatewayCapture>,
    refunds: HashMap<String, GatewayRefund>,
    refunded: HashMap<String, Money>,
    next_id: u32,
    decline: bool,
    fail_refunds: bool,
    unavailable: bool,
    delay: Option<Duration>,
}

/// In-memory gateway for tests and local runs.
///
/// A configured delay is applied after the capture is recorded, which models
/// a capture that lands while the caller has already given up on it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every new capture.
    pub fn set_decline(&self, decline: bool) {
        self.lock().decline = decline;
    }

    /// Fails every refund with `Unavailable`.
    pub fn set_fail_refunds(&self, fail: bool) {
        self.lock().fail_refunds = fail;
    }

    /// Fails every call with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_capture_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    /// Number of captures that moved money.
    pub fn capture_count(&self) -> usize {
        self.lock()
            .captures
            .values()
            .filter(|c| c.status == CaptureStatus::Completed)
            .count()
    }

    pub fn refund_count(&self) -> usize {
        self.lock().refunds.len()
    }

    /// Total captured minus total refunded.
    pub fn net_captured(&self) -> Money {
        let state = self.lock();
        let captured: Money = state
            .captures
            .values()
            .filter(|c| c.status == CaptureStatus::Completed)
            .map(|c| c.amount)
            .sum();
        let refunded: Money = state.refunded.values().copied().sum();
        captured - refunded
    }

    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn capture(
        &self,
        amount: Money,
        _currency: &str,
        idempotency_key: &str,
        _source: &str,
    ) -> Result<GatewayCapture, GatewayError> {
        let (capture, delay) = {
            let mut state = self.lock();
            if state.unavailable {
                return Err(GatewayError::Unavailable("connection refused".to_string()));
            }
            if let Some(existing) = state.captures.get(idempotency_key) {
                return Ok(existing.clone());
            }

            state.next_id += 1;
            let id = format!("ch_{:06}", state.next_id);
            let capture = if state.decline {
                GatewayCapture {
                    id,
                    status: CaptureStatus::Declined,
                    amount,
                    receipt_url: None,
                    message: Some("card declined".to_string()),
                }
            } else {
                GatewayCapture {
                    receipt_url: Some(format!("https://receipts.example.com/{id}")),
                    id,
                    status: CaptureStatus::Completed,
                    amount,
                    message: None,
                }
            };
            state
                .captures
                .insert(idempotency_key.to_string(), capture.clone());
            (capture, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(capture)
    }

    async fn refund(
        &self,
        capture_id: &str,
        amount: Option<Money>,
        idempotency_key: &str,
    ) -> Result<GatewayRefund, GatewayError> {
        let mut state = self.lock();
        if state.unavailable || state.fail_refunds {
            return Err(GatewayError::Unavailable("refund service down".to_string()));
        }
        if let Some(existing) = state.refunds.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let captured = state
            .captures
            .values()
            .find(|c| c.id == capture_id && c.status == CaptureStatus::Completed)
            .map(|c| c.amount)
            .ok_or_else(|| GatewayError::UnknownCapture(capture_id.to_string()))?;
        let already = state.refunded.get(capture_id).copied().unwrap_or_default();
        let refundable = captured.saturating_sub(already);
        let requested = amount.unwrap_or(refundable);
        if requested > refundable || !requested.is_positive() {
            return Err(GatewayError::RefundExceedsCapture {
                requested,
                refundable,
            });
        }

        state.next_id += 1;
        let refund = GatewayRefund {
            id: format!("re_{:06}", state.next_id),
            capture_id: capture_id.to_string(),
            amount: requested,
        };
        *state.refunded.entry(capture_id.to_string()).or_default() += requested;
        state
            .refunds
            .insert(idempotency_key.to_string(), refund.clone());
        Ok(refund)
    }

    async fn find_capture(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<GatewayCapture>, GatewayError> {
        let state = self.lock();
        if state.unavailable {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        Ok(state.captures.get(idempotency_key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_is_idempotent_per_key() {
        let gateway = InMemoryPaymentGateway::new();

        let first = gateway
            .capture(Money::from_dollars(100), "USD", "key-1", "tok_visa")
            .await
            .unwrap();
        let second = gateway
            .capture(Money::from_dollars(100), "USD", "key-1", "tok_visa")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, CaptureStatus::Completed);
        assert!(first.receipt_url.is_some());
        assert_eq!(gateway.capture_count(), 1);
    }

    #[tokio::test]
    async fn test_decline() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_decline(true);

        let capture = gateway
            .capture(Money::from_dollars(100), "USD", "key-1", "tok_visa")
            .await
            .unwrap();
        assert_eq!(capture.status, CaptureStatus::Declined);
        assert_eq!(gateway.capture_count(), 0);
        assert_eq!(gateway.net_captured(), Money::zero());
    }

    #[tokio::test]
    async fn test_refunds() {
        let gateway = InMemoryPaymentGateway::new();
        let capture = gateway
            .capture(Money::from_dollars(100), "USD", "key-1", "tok_visa")
            .await
            .unwrap();

        let partial = gateway
            .refund(&capture.id, Some(Money::from_dollars(30)), "r-1")
            .await
            .unwrap();
        assert_eq!(partial.amount, Money::from_dollars(30));

        // Same key, same refund.
        let again = gateway
            .refund(&capture.id, Some(Money::from_dollars(30)), "r-1")
            .await
            .unwrap();
        assert_eq!(again, partial);

        let rest = gateway.refund(&capture.id, None, "r-2").await.unwrap();
        assert_eq!(rest.amount, Money::from_dollars(70));
        assert_eq!(gateway.net_captured(), Money::zero());

        let over = gateway.refund(&capture.id, None, "r-3").await;
        assert!(matches!(over, Err(GatewayError::RefundExceedsCapture { .. })));
        assert_eq!(gateway.refund_count(), 2);
    }

    #[tokio::test]
    async fn test_refund_unknown_capture() {
        let gateway = InMemoryPaymentGateway::new();
        let result = gateway.refund("ch_missing", None, "r-1").await;
        assert!(matches!(result, Err(GatewayError::UnknownCapture(_))));
    }

    #[tokio::test]
    async fn test_find_capture() {
        let gateway = InMemoryPaymentGateway::new();
        assert!(gateway.find_capture("key-1").await.unwrap().is_none());

        gateway
            .capture(Money::from_dollars(5), "USD", "key-1", "tok_visa")
            .await
            .unwrap();
        assert!(gateway.find_capture("key-1").await.unwrap().is_some());

        gateway.set_unavailable(true);
        assert!(gateway.find_capture("key-1").await.is_err());
    }
}
