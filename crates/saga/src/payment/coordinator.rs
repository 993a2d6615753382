//! Payment coordinator: bounded, idempotent captures and refunds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{AggregateId, Money, SharedClock};
use domain::CommandHandler;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::services::{CaptureStatus, PaymentGateway};

use super::{PaymentEvent, PaymentOutcomeData, PaymentStatus, PaymentTransaction, RefundRecord};

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    /// Upper bound on one gateway capture call.
    pub timeout: Duration,
    /// Accepted ISO currency codes.
    pub currencies: Vec<String>,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            currencies: vec!["USD".to_string()],
        }
    }
}

impl PaymentSettings {
    pub fn supports(&self, currency: &str) -> bool {
        self.currencies
            .iter()
            .any(|c| c.eq_ignore_ascii_case(currency))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub currency: String,
    pub booking_id: AggregateId,
    /// Stable per purchase; never regenerated on retry.
    pub idempotency_key: String,
    /// Opaque card token handed to the gateway.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub amount: Money,
    pub transaction_id: Option<String>,
    pub receipt_url: Option<String>,
    pub error_message: Option<String>,
}

impl PaymentResult {
    fn from_transaction(payment_id: &str, payment: &PaymentTransaction) -> Self {
        Self {
            payment_id: payment_id.to_string(),
            status: payment.status().unwrap_or(PaymentStatus::TimedOut),
            amount: payment.amount(),
            transaction_id: payment.gateway_transaction_id().map(str::to_string),
            receipt_url: payment.receipt_url().map(str::to_string),
            error_message: payment.message().map(str::to_string),
        }
    }

    pub fn is_captured(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund_id: String,
    /// Status of the payment after the refund.
    pub status: PaymentStatus,
    pub amount: Money,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The payment was not in the timed-out state.
    NotTimedOut,
    /// The gateway holds no completed capture for the key.
    NothingCaptured,
    /// The capture had landed and was refunded.
    Refunded(RefundResult),
}

/// Captures and refunds payments through a [`PaymentGateway`].
///
/// Every attempt is recorded on `payment-{payment_id}`. A repeated request
/// with the same idempotency key is answered from that stream without a new
/// gateway call.
pub struct PaymentCoordinator<S: EventStore> {
    handler: CommandHandler<S, PaymentTransaction>,
    gateway: Arc<dyn PaymentGateway>,
    settings: PaymentSettings,
    clock: SharedClock,
}

impl<S: EventStore> PaymentCoordinator<S> {
    pub fn new(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        settings: PaymentSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            handler: CommandHandler::new(store),
            gateway,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.idempotency_key, amount = %request.amount))]
    pub async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, SagaError> {
        if !request.amount.is_positive() {
            return Err(SagaError::Validation(format!(
                "payment amount must be positive, got {}",
                request.amount
            )));
        }
        if !self.settings.supports(&request.currency) {
            return Err(SagaError::Validation(format!(
                "unsupported currency {}",
                request.currency
            )));
        }
        if request.idempotency_key.trim().is_empty() {
            return Err(SagaError::Validation(
                "idempotency key is required".to_string(),
            ));
        }

        let payment_id = PaymentTransaction::id_for(&request.idempotency_key);
        let stream = PaymentTransaction::stream_for(&payment_id);
        if let Some(recorded) = self.handler.load_existing(&stream).await? {
            tracing::info!(%payment_id, "payment already attempted, returning recorded outcome");
            return Ok(PaymentResult::from_transaction(&payment_id, &recorded));
        }

        let started = Instant::now();
        let call = self.gateway.capture(
            request.amount,
            &request.currency,
            &request.idempotency_key,
            &request.source,
        );
        let answer = tokio::time::timeout(self.settings.timeout, call).await;
        metrics::histogram!("payment_capture_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let mut data = PaymentOutcomeData {
            payment_id: payment_id.clone(),
            idempotency_key: request.idempotency_key.clone(),
            booking_id: request.booking_id,
            amount: request.amount,
            currency: request.currency.to_ascii_uppercase(),
            gateway_transaction_id: None,
            receipt_url: None,
            message: None,
            at: self.clock.now(),
        };
        let outcome = match answer {
            Ok(Ok(capture)) => {
                data.gateway_transaction_id = Some(capture.id);
                match capture.status {
                    CaptureStatus::Completed => {
                        data.receipt_url = capture.receipt_url;
                        PaymentEvent::PaymentCaptured(data)
                    }
                    CaptureStatus::Declined => {
                        data.message = capture.message.or(Some("declined".to_string()));
                        PaymentEvent::PaymentDeclined(data)
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "gateway call failed, treating as timed out");
                data.message = Some(e.to_string());
                PaymentEvent::PaymentTimedOut(data)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "gateway did not answer in time"
                );
                data.message = Some(format!(
                    "no answer from the gateway within {} ms",
                    self.settings.timeout.as_millis()
                ));
                PaymentEvent::PaymentTimedOut(data)
            }
        };

        let payment = match self.handler.execute(&stream, |p| p.record(outcome)).await {
            Ok(result) => result.aggregate,
            // A concurrent retry of the same request recorded first.
            Err(e) => match self.handler.load_existing(&stream).await? {
                Some(recorded) => recorded,
                None => return Err(e.into()),
            },
        };

        let result = PaymentResult::from_transaction(&payment_id, &payment);
        metrics::counter!("payment_captures_total", "status" => result.status.as_str())
            .increment(1);
        tracing::info!(%payment_id, status = %result.status, "payment processed");
        Ok(result)
    }

    /// Refunds `amount`, or everything still refundable.
    ///
    /// A fully refunded payment answers with its last refund and the gateway
    /// is not called again.
    #[tracing::instrument(skip(self))]
    pub async fn process_refund(
        &self,
        payment_id: &str,
        amount: Option<Money>,
    ) -> Result<RefundResult, SagaError> {
        let payment = self.get_payment_status(payment_id).await?;
        let status = payment.status().unwrap_or(PaymentStatus::TimedOut);

        if status == PaymentStatus::Refunded
            && let Some(last) = payment.refunds().last()
        {
            return Ok(RefundResult {
                refund_id: last.refund_id.clone(),
                status,
                amount: last.amount,
                error_message: None,
            });
        }
        if !status.is_refundable() {
            return Err(SagaError::InvalidState {
                entity: "payment",
                state: status.to_string(),
                action: "refund",
            });
        }

        let refundable = payment.refundable();
        let amount = amount.unwrap_or(refundable);
        if !amount.is_positive() || amount > refundable {
            return Err(SagaError::Validation(format!(
                "refund amount {amount} must be between $0.01 and {refundable}"
            )));
        }
        let capture_id = payment.gateway_transaction_id().ok_or_else(|| {
            SagaError::Validation(format!("payment {payment_id} has no capture"))
        })?;

        let refund_key = format!("{payment_id}-refund-{}", payment.refunds().len() + 1);
        let refund = self
            .gateway
            .refund(capture_id, Some(amount), &refund_key)
            .await
            .map_err(|e| SagaError::RefundFailed {
                payment_id: payment_id.to_string(),
                reason: e.to_string(),
            })?;

        let record = RefundRecord {
            refund_id: refund.id.clone(),
            amount: refund.amount,
            at: self.clock.now(),
        };
        let result = self
            .handler
            .execute_with_retry(&PaymentTransaction::stream_for(payment_id), |p| {
                p.record_refund(record.clone())
            })
            .await?;

        metrics::counter!("payment_refunds_total").increment(1);
        tracing::info!(payment_id, refund_id = %refund.id, amount = %refund.amount, "payment refunded");
        Ok(RefundResult {
            refund_id: refund.id,
            status: result.aggregate.status().unwrap_or(status),
            amount: refund.amount,
            error_message: None,
        })
    }

    pub async fn get_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentTransaction, SagaError> {
        self.find_payment(payment_id)
            .await?
            .ok_or_else(|| SagaError::PaymentNotFound(payment_id.to_string()))
    }

    pub async fn find_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<PaymentTransaction>, SagaError> {
        Ok(self
            .handler
            .load_existing(&PaymentTransaction::stream_for(payment_id))
            .await?)
    }

    /// Settles a timed-out payment: if the capture landed after all, it is
    /// recorded and refunded in full.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_timed_out(
        &self,
        payment_id: &str,
    ) -> Result<ReconcileOutcome, SagaError> {
        let payment = self.get_payment_status(payment_id).await?;
        if payment.status() != Some(PaymentStatus::TimedOut) {
            return Ok(ReconcileOutcome::NotTimedOut);
        }
        let key = payment.idempotency_key().unwrap_or_default();

        match self.gateway.find_capture(key).await? {
            Some(capture) if capture.status == CaptureStatus::Completed => {
                tracing::warn!(payment_id, capture = %capture.id, "timed-out capture landed, refunding");
                self.handler
                    .execute_with_retry(&PaymentTransaction::stream_for(payment_id), |p| {
                        p.record_late_capture(
                            capture.id.clone(),
                            capture.amount,
                            capture.receipt_url.clone(),
                        )
                    })
                    .await?;
                let refund = self.process_refund(payment_id, None).await?;
                Ok(ReconcileOutcome::Refunded(refund))
            }
            _ => Ok(ReconcileOutcome::NothingCaptured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryPaymentGateway;
    use chrono::Utc;
    use common::SystemClock;
    use event_store::InMemoryEventStore;

    fn coordinator(
        gateway: &InMemoryPaymentGateway,
        timeout: Duration,
    ) -> PaymentCoordinator<InMemoryEventStore> {
        PaymentCoordinator::new(
            InMemoryEventStore::new(),
            Arc::new(gateway.clone()),
            PaymentSettings {
                timeout,
                ..PaymentSettings::default()
            },
            Arc::new(SystemClock),
        )
    }

    fn request(amount: Money) -> PaymentRequest {
        PaymentRequest {
            amount,
            currency: "usd".to_string(),
            booking_id: AggregateId::new(),
            idempotency_key: AggregateId::new().to_string(),
            source: "tok_visa".to_string(),
        }
    }

    #[tokio::test]
    async fn test_capture_and_replay() {
        let gateway = InMemoryPaymentGateway::new();
        let payments = coordinator(&gateway, Duration::from_secs(1));
        let request = request(Money::from_dollars(4800));

        let first = payments.process_payment(&request).await.unwrap();
        assert!(first.is_captured());
        assert!(first.transaction_id.is_some());
        assert!(first.receipt_url.is_some());

        let second = payments.process_payment(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.capture_count(), 1);

        let payment = payments.get_payment_status(&first.payment_id).await.unwrap();
        assert_eq!(payment.captured(), Money::from_dollars(4800));
        assert_eq!(payment.currency(), Some("USD"));
        assert!(payment.transaction_date().unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn test_rejects_before_gateway() {
        let gateway = InMemoryPaymentGateway::new();
        let payments = coordinator(&gateway, Duration::from_secs(1));

        let zero = payments.process_payment(&request(Money::zero())).await;
        assert!(matches!(zero, Err(SagaError::Validation(_))));

        let mut euros = request(Money::from_dollars(10));
        euros.currency = "EUR".to_string();
        assert!(matches!(
            payments.process_payment(&euros).await,
            Err(SagaError::Validation(_))
        ));
        assert_eq!(gateway.capture_count(), 0);
    }

    #[tokio::test]
    async fn test_decline_is_recorded() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_decline(true);
        let payments = coordinator(&gateway, Duration::from_secs(1));

        let result = payments
            .process_payment(&request(Money::from_dollars(10)))
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::Declined);
        assert_eq!(result.error_message.as_deref(), Some("card declined"));
    }

    #[tokio::test]
    async fn test_timeout_fails_closed_and_reconciles() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_capture_delay(Some(Duration::from_millis(300)));
        let payments = coordinator(&gateway, Duration::from_millis(20));

        let result = payments
            .process_payment(&request(Money::from_dollars(500)))
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::TimedOut);
        assert!(result.transaction_id.is_none());

        // The capture landed at the gateway even though the call timed out.
        assert_eq!(gateway.net_captured(), Money::from_dollars(500));

        let outcome = payments.reconcile_timed_out(&result.payment_id).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Refunded(_)));
        assert_eq!(gateway.net_captured(), Money::zero());

        let payment = payments.get_payment_status(&result.payment_id).await.unwrap();
        assert_eq!(payment.status(), Some(PaymentStatus::Refunded));

        let again = payments.reconcile_timed_out(&result.payment_id).await.unwrap();
        assert_eq!(again, ReconcileOutcome::NotTimedOut);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_counts_as_timeout() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_unavailable(true);
        let payments = coordinator(&gateway, Duration::from_secs(1));

        let result = payments
            .process_payment(&request(Money::from_dollars(10)))
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::TimedOut);

        gateway.set_unavailable(false);
        let outcome = payments.reconcile_timed_out(&result.payment_id).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NothingCaptured);
    }

    #[tokio::test]
    async fn test_refunds() {
        let gateway = InMemoryPaymentGateway::new();
        let payments = coordinator(&gateway, Duration::from_secs(1));
        let payment = payments
            .process_payment(&request(Money::from_dollars(100)))
            .await
            .unwrap();

        let partial = payments
            .process_refund(&payment.payment_id, Some(Money::from_dollars(25)))
            .await
            .unwrap();
        assert_eq!(partial.status, PaymentStatus::PartiallyRefunded);

        let rest = payments
            .process_refund(&payment.payment_id, None)
            .await
            .unwrap();
        assert_eq!(rest.amount, Money::from_dollars(75));
        assert_eq!(rest.status, PaymentStatus::Refunded);

        let repeat = payments
            .process_refund(&payment.payment_id, None)
            .await
            .unwrap();
        assert_eq!(repeat, rest);
        assert_eq!(gateway.refund_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_refund_is_reported() {
        let gateway = InMemoryPaymentGateway::new();
        let payments = coordinator(&gateway, Duration::from_secs(1));
        let payment = payments
            .process_payment(&request(Money::from_dollars(100)))
            .await
            .unwrap();

        gateway.set_fail_refunds(true);
        let result = payments.process_refund(&payment.payment_id, None).await;
        assert!(matches!(result, Err(SagaError::RefundFailed { .. })));

        let recorded = payments.get_payment_status(&payment.payment_id).await.unwrap();
        assert_eq!(recorded.status(), Some(PaymentStatus::Completed));
    }

    #[tokio::test]
    async fn test_unknown_payment() {
        let gateway = InMemoryPaymentGateway::new();
        let payments = coordinator(&gateway, Duration::from_secs(1));
        assert!(matches!(
            payments.get_payment_status("PAY-missing").await,
            Err(SagaError::PaymentNotFound(_))
        ));
        assert!(matches!(
            payments.process_refund("PAY-missing", None).await,
            Err(SagaError::PaymentNotFound(_))
        ));
    }
}
