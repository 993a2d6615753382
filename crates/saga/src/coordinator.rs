//! Purchase saga coordinator.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use common::{AggregateId, SharedClock};
use domain::{
    Aggregate, BookingRegistry, CommandHandler, CouponCode, CouponLedger, DomainError, NewBooking,
    Product,
};
use event_store::EventStore;

use crate::aggregate::{Purchase, PurchaseError, purchase_stream};
use crate::error::SagaError;
use crate::events::{PaymentFailedData, PurchaseEvent, PurchaseStartedData};
use crate::notification::NotificationScheduler;
use crate::payment::{PaymentCoordinator, PaymentRequest, PaymentStatus, ReconcileOutcome};
use crate::purchase_flow;
use crate::request::{PurchaseRequest, PurchaseResult};
use crate::state::PurchaseStatus;

/// Orchestrates purchases: booking, discount, payment, confirmation.
///
/// Steps run in order and every outcome is recorded on the purchase's own
/// stream. When a step fails after the booking exists, the steps already
/// taken are undone. A compensation step that fails leaves the purchase
/// `Compensating` and queued for
/// [`retry_pending_compensations`](Self::retry_pending_compensations).
pub struct PurchaseSaga<S: EventStore + Clone> {
    purchases: CommandHandler<S, Purchase>,
    bookings: Arc<BookingRegistry<S>>,
    coupons: Arc<CouponLedger<S>>,
    payments: Arc<PaymentCoordinator<S>>,
    notifications: Arc<NotificationScheduler<S>>,
    clock: SharedClock,
    currency: String,
    pending: Mutex<BTreeSet<AggregateId>>,
}

impl<S: EventStore + Clone> PurchaseSaga<S> {
    pub fn new(
        store: S,
        bookings: Arc<BookingRegistry<S>>,
        coupons: Arc<CouponLedger<S>>,
        payments: Arc<PaymentCoordinator<S>>,
        notifications: Arc<NotificationScheduler<S>>,
        clock: SharedClock,
    ) -> Self {
        let currency = payments
            .settings()
            .currencies
            .first()
            .cloned()
            .unwrap_or_else(|| "USD".to_string());
        Self {
            purchases: CommandHandler::new(store),
            bookings,
            coupons,
            payments,
            notifications,
            clock,
            currency,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Runs a purchase to completion or to a compensated failure.
    ///
    /// Malformed requests and unknown products are rejected with an error
    /// before anything is recorded. Every later failure is reported in the
    /// returned [`PurchaseResult`].
    #[tracing::instrument(skip(self, request), fields(product = %request.product_id, attendees = request.attendees.len()))]
    pub async fn process_purchase(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseResult, SagaError> {
        let coupon = request.validate()?;
        let product = self
            .bookings
            .catalog()
            .get(&request.product_id)
            .cloned()
            .ok_or_else(|| DomainError::ProductNotFound(request.product_id.to_string()))?;

        metrics::counter!("purchases_total").increment(1);
        let started = Instant::now();

        let purchase_id = AggregateId::new();
        let data = PurchaseStartedData {
            purchase_id,
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            kind: product.kind,
            start: request.start,
            end: product.session_end(request.start),
            attendees: request.attendees.clone(),
            contact: request.contact.clone(),
            coupon_code: coupon.as_ref().map(|c| c.to_string()),
            started_at: self.clock.now(),
        };
        self.purchases
            .execute(&purchase_stream(purchase_id), |p| p.begin(data))
            .await?;
        tracing::info!(%purchase_id, "purchase started");

        let purchase = self
            .run_steps(purchase_id, &product, &request, coupon.as_ref())
            .await?;

        metrics::histogram!("purchase_duration_seconds").record(started.elapsed().as_secs_f64());
        Ok(PurchaseResult::from(&purchase))
    }

    async fn run_steps(
        &self,
        purchase_id: AggregateId,
        product: &Product,
        request: &PurchaseRequest,
        coupon: Option<&CouponCode>,
    ) -> Result<Purchase, SagaError> {
        // Step 1: hold the session
        tracing::info!(step = purchase_flow::STEP_CREATE_BOOKING, "saga step started");
        let new_booking = NewBooking {
            product_id: product.id.clone(),
            start: request.start,
            attendees: request.attendee_count(),
        };
        let booking = match self.bookings.create(&new_booking).await {
            Ok(booking) => booking,
            Err(e) => return self.reject(purchase_id, e.into()).await,
        };
        let booking_id = booking.id().ok_or_else(|| {
            SagaError::Validation("booking was recorded without an id".to_string())
        })?;
        let workshop_id = booking
            .workshop_id()
            .map(|w| w.to_string())
            .unwrap_or_default();
        let total = product.price_for(request.attendee_count());
        self.record(purchase_id, |p| {
            p.record_booking(booking_id, workshop_id.clone(), total)
        })
        .await?;

        // Step 2: redeem the coupon
        tracing::info!(step = purchase_flow::STEP_APPLY_DISCOUNT, "saga step started");
        let discount = match coupon {
            Some(code) => match self
                .coupons
                .apply_coupon(code.as_str(), total, purchase_id)
                .await
            {
                Ok(discount) => discount,
                Err(e) => {
                    return self
                        .fail(purchase_id, purchase_flow::STEP_APPLY_DISCOUNT, e.into())
                        .await;
                }
            },
            None => common::Money::zero(),
        };
        let code = coupon.map(|c| c.to_string());
        let purchase = self
            .record(purchase_id, |p| p.apply_discount(code.clone(), discount))
            .await?;

        // Step 3: take the money
        tracing::info!(step = purchase_flow::STEP_CAPTURE_PAYMENT, "saga step started");
        let amount_due = purchase.amount_due();
        if amount_due.is_positive() {
            let payment_request = PaymentRequest {
                amount: amount_due,
                currency: self.currency.clone(),
                booking_id,
                idempotency_key: purchase_id.to_string(),
                source: request.payment_source.clone(),
            };
            let payment = match self.payments.process_payment(&payment_request).await {
                Ok(payment) => payment,
                Err(e) => {
                    return self
                        .fail(purchase_id, purchase_flow::STEP_CAPTURE_PAYMENT, e)
                        .await;
                }
            };
            if !payment.is_captured() {
                let message = payment
                    .error_message
                    .clone()
                    .unwrap_or_else(|| payment.status.to_string());
                let failure = PaymentFailedData {
                    payment_id: payment.payment_id.clone(),
                    status: payment.status,
                    error: message.clone(),
                };
                self.record(purchase_id, |p| p.record_payment_failure(failure.clone()))
                    .await?;
                let error = match payment.status {
                    PaymentStatus::TimedOut => SagaError::GatewayTimeout(message),
                    _ => SagaError::PaymentDeclined(message),
                };
                return self
                    .fail(purchase_id, purchase_flow::STEP_CAPTURE_PAYMENT, error)
                    .await;
            }
            self.record(purchase_id, |p| {
                p.record_capture(
                    Some(payment.payment_id.clone()),
                    payment.transaction_id.clone(),
                    payment.receipt_url.clone(),
                )
            })
            .await?;
        } else {
            tracing::info!(%purchase_id, "nothing to charge, skipping the gateway");
            self.record(purchase_id, |p| p.record_capture(None, None, None))
                .await?;
        }

        // Step 4: confirm the booking
        tracing::info!(step = purchase_flow::STEP_CONFIRM_BOOKING, "saga step started");
        if let Err(e) = self.bookings.confirm(booking_id).await {
            return self
                .fail(purchase_id, purchase_flow::STEP_CONFIRM_BOOKING, e.into())
                .await;
        }

        let confirmation = format!(
            "{}-{}",
            product.kind.confirmation_prefix(),
            purchase_id.short_code()
        );
        let at = self.clock.now();
        let purchase = self
            .record(purchase_id, |p| p.complete(confirmation.clone(), at))
            .await?;

        if let Some(follow_up) = purchase.follow_up()
            && let Err(e) = self.notifications.schedule_follow_up_emails(follow_up).await
        {
            tracing::warn!(%purchase_id, error = %e, "could not schedule follow-up emails");
        }

        metrics::counter!("purchases_completed").increment(1);
        tracing::info!(%purchase_id, %confirmation, "purchase completed");
        Ok(purchase)
    }

    /// Cancels a completed purchase: refunds what was paid, cancels the
    /// booking and stops follow-up emails. The coupon use stays consumed.
    ///
    /// Cancelling a cancelled purchase returns it unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_purchase(
        &self,
        purchase_id: AggregateId,
    ) -> Result<PurchaseResult, SagaError> {
        let purchase = self.get_purchase(purchase_id).await?;
        match (purchase.status(), purchase.compensation_target()) {
            (PurchaseStatus::Cancelled, _) => return Ok(PurchaseResult::from(&purchase)),
            (PurchaseStatus::Completed, _)
            | (PurchaseStatus::Compensating, Some(PurchaseStatus::Cancelled)) => {}
            (status, _) => {
                return Err(SagaError::InvalidState {
                    entity: "purchase",
                    state: status.to_string(),
                    action: "cancel",
                });
            }
        }

        let at = self.clock.now();
        let outcome = match self
            .record(purchase_id, |p| {
                p.begin_compensation(
                    PurchaseStatus::Cancelled,
                    purchase_flow::STEP_CUSTOMER_CANCELLATION,
                    "cancelled by customer".to_string(),
                    None,
                    at,
                )
            })
            .await
        {
            Ok(purchase) => self.compensate(purchase).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(purchase) => Ok(PurchaseResult::from(&purchase)),
            Err(e) => {
                // A concurrent cancellation may have finished first.
                let purchase = self.get_purchase(purchase_id).await?;
                if purchase.status() == PurchaseStatus::Cancelled {
                    Ok(PurchaseResult::from(&purchase))
                } else {
                    Err(e)
                }
            }
        }
    }

    pub async fn get_purchase(&self, purchase_id: AggregateId) -> Result<Purchase, SagaError> {
        self.purchases
            .load_existing(&purchase_stream(purchase_id))
            .await?
            .ok_or(SagaError::PurchaseNotFound(purchase_id))
    }

    pub async fn get_purchase_status(
        &self,
        purchase_id: AggregateId,
    ) -> Result<PurchaseStatus, SagaError> {
        Ok(self.get_purchase(purchase_id).await?.status())
    }

    /// Purchases parked in `Compensating`, waiting for a retry.
    pub fn pending_compensations(&self) -> Vec<AggregateId> {
        self.lock_pending().iter().copied().collect()
    }

    /// Re-runs compensation for every queued purchase. Returns how many
    /// reached their final state.
    pub async fn retry_pending_compensations(&self) -> Result<usize, SagaError> {
        let queued = self.pending_compensations();
        let mut finished = 0;
        for purchase_id in queued {
            let purchase = self.get_purchase(purchase_id).await?;
            if purchase.status() != PurchaseStatus::Compensating {
                self.lock_pending().remove(&purchase_id);
                continue;
            }
            tracing::info!(%purchase_id, "retrying compensation");
            if self.compensate(purchase).await?.status().is_terminal() {
                finished += 1;
            }
        }
        Ok(finished)
    }

    /// Rebuilds the retry queue from the journal.
    ///
    /// Meant for start-up: purchases found mid-flight were abandoned by a
    /// previous process and are compensated to `Failed`. Returns how many
    /// purchases were queued.
    pub async fn recover_stalled(&self) -> Result<usize, SagaError> {
        let streams = self
            .purchases
            .store()
            .stream_ids(Purchase::aggregate_type())
            .await?;

        let mut queued = 0;
        for stream in streams {
            let Some(purchase) = self.purchases.load_existing(&stream).await? else {
                continue;
            };
            let Some(purchase_id) = purchase.id() else {
                continue;
            };
            if purchase.status().is_in_flight() {
                tracing::warn!(%purchase_id, status = %purchase.status(), "abandoned purchase found");
                let at = self.clock.now();
                self.record(purchase_id, |p| {
                    p.begin_compensation(
                        PurchaseStatus::Failed,
                        purchase_flow::STEP_RECOVERY,
                        "interrupted before completion".to_string(),
                        Some(crate::error::ErrorKind::Internal),
                        at,
                    )
                })
                .await?;
            } else if purchase.status() != PurchaseStatus::Compensating {
                continue;
            }
            self.lock_pending().insert(purchase_id);
            queued += 1;
        }
        Ok(queued)
    }

    /// Fails a purchase that has no booking yet.
    async fn reject(
        &self,
        purchase_id: AggregateId,
        error: SagaError,
    ) -> Result<Purchase, SagaError> {
        let kind = error.kind();
        tracing::warn!(%purchase_id, step = purchase_flow::STEP_CREATE_BOOKING, error = %error, "saga step failed");
        let at = self.clock.now();
        let reason = error.to_string();
        let purchase = self
            .record(purchase_id, |p| p.reject(reason.clone(), kind, at))
            .await?;
        metrics::counter!("purchases_failed", "kind" => kind.as_str()).increment(1);
        Ok(purchase)
    }

    /// Records the failed step and undoes what was done before it.
    async fn fail(
        &self,
        purchase_id: AggregateId,
        step: &'static str,
        error: SagaError,
    ) -> Result<Purchase, SagaError> {
        let kind = error.kind();
        tracing::warn!(%purchase_id, step, error = %error, "saga step failed");
        let at = self.clock.now();
        let reason = error.to_string();
        let purchase = self
            .record(purchase_id, |p| {
                p.begin_compensation(PurchaseStatus::Failed, step, reason.clone(), Some(kind), at)
            })
            .await?;
        self.compensate(purchase).await
    }

    /// Runs every compensation step not yet done, in order: payment, booking,
    /// coupon, notifications. Each step is idempotent, so a re-run after a
    /// partial failure only repeats what did not finish.
    #[tracing::instrument(skip(self, purchase), fields(purchase_id = ?purchase.id()))]
    async fn compensate(&self, purchase: Purchase) -> Result<Purchase, SagaError> {
        let purchase_id = purchase
            .id()
            .ok_or_else(|| SagaError::Validation("purchase has no id".to_string()))?;
        let target = purchase
            .compensation_target()
            .unwrap_or(PurchaseStatus::Failed);
        let mut failures = 0;

        if let Some(payment_id) = purchase.payment_id()
            && !purchase.has_compensated(purchase_flow::STEP_REFUND_PAYMENT)
        {
            let outcome = match self.settle_payment(payment_id).await {
                Ok(Some((refund_id, amount))) => {
                    self.record(purchase_id, |p| p.record_refund(&refund_id, amount))
                        .await?;
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e.to_string()),
            };
            failures += self
                .record_step(purchase_id, purchase_flow::STEP_REFUND_PAYMENT, outcome)
                .await?;
        }

        if let Some(booking_id) = purchase.booking_id()
            && !purchase.has_compensated(purchase_flow::STEP_CANCEL_BOOKING)
        {
            let reason = purchase.failure_reason().unwrap_or("purchase compensated");
            let outcome = self
                .bookings
                .cancel(booking_id, reason)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            failures += self
                .record_step(purchase_id, purchase_flow::STEP_CANCEL_BOOKING, outcome)
                .await?;
        }

        if target == PurchaseStatus::Failed
            && let Some(code) = purchase.coupon_code()
            && !purchase.has_compensated(purchase_flow::STEP_RELEASE_COUPON)
        {
            let outcome = match self.coupons.release_coupon(code, purchase_id).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.to_string()),
            };
            failures += self
                .record_step(purchase_id, purchase_flow::STEP_RELEASE_COUPON, outcome)
                .await?;
        }

        if target == PurchaseStatus::Cancelled
            && !purchase.has_compensated(purchase_flow::STEP_CANCEL_NOTIFICATIONS)
        {
            let outcome = self
                .notifications
                .cancel_schedule(purchase_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string());
            failures += self
                .record_step(purchase_id, purchase_flow::STEP_CANCEL_NOTIFICATIONS, outcome)
                .await?;
        }

        if failures > 0 {
            self.lock_pending().insert(purchase_id);
            metrics::counter!("compensations_parked_total").increment(1);
            tracing::warn!(%purchase_id, failures, "compensation incomplete, queued for retry");
            return self.get_purchase(purchase_id).await;
        }

        let at = self.clock.now();
        let purchase = self
            .record(purchase_id, |p| p.finish_compensation(at))
            .await?;
        self.lock_pending().remove(&purchase_id);

        match purchase.status() {
            PurchaseStatus::Cancelled => {
                metrics::counter!("purchases_cancelled").increment(1);
                tracing::info!(%purchase_id, refunded = %purchase.refunded_amount(), "purchase cancelled");
            }
            _ => {
                let kind = purchase
                    .error_kind()
                    .map(|k| k.as_str())
                    .unwrap_or("unknown");
                metrics::counter!("purchases_failed", "kind" => kind).increment(1);
                tracing::warn!(%purchase_id, reason = ?purchase.failure_reason(), "purchase failed");
            }
        }
        Ok(purchase)
    }

    /// Gives back whatever the payment holds. Returns the refund issued, if
    /// money had moved.
    async fn settle_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<(String, common::Money)>, SagaError> {
        let Some(payment) = self.payments.find_payment(payment_id).await? else {
            return Ok(None);
        };
        match payment.status() {
            Some(
                PaymentStatus::Completed
                | PaymentStatus::PartiallyRefunded
                | PaymentStatus::Refunded,
            ) => {
                let refund = self.payments.process_refund(payment_id, None).await?;
                Ok(Some((refund.refund_id, refund.amount)))
            }
            Some(PaymentStatus::TimedOut) => {
                match self.payments.reconcile_timed_out(payment_id).await? {
                    ReconcileOutcome::Refunded(refund) => {
                        Ok(Some((refund.refund_id, refund.amount)))
                    }
                    ReconcileOutcome::NothingCaptured | ReconcileOutcome::NotTimedOut => {
                        Ok(None)
                    }
                }
            }
            Some(PaymentStatus::Declined) | None => Ok(None),
        }
    }

    /// Records one compensation outcome; returns 1 if it failed.
    async fn record_step(
        &self,
        purchase_id: AggregateId,
        step: &'static str,
        outcome: Result<(), String>,
    ) -> Result<usize, SagaError> {
        if let Err(error) = &outcome {
            tracing::warn!(%purchase_id, step, error, "compensation step failed");
        }
        self.record(purchase_id, |p| p.record_compensation_step(step, &outcome))
            .await?;
        Ok(usize::from(outcome.is_err()))
    }

    async fn record<F>(&self, purchase_id: AggregateId, command: F) -> Result<Purchase, SagaError>
    where
        F: Fn(&Purchase) -> Result<Vec<PurchaseEvent>, PurchaseError>,
    {
        let result = self
            .purchases
            .execute_with_retry(&purchase_stream(purchase_id), command)
            .await?;
        Ok(result.aggregate)
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeSet<AggregateId>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PaymentSettings;
    use crate::request::{Attendee, Contact};
    use crate::services::{InMemoryNotifier, InMemoryPaymentGateway};
    use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
    use common::{ManualClock, Money};
    use domain::{AvailabilityEngine, BusinessHours, Catalog, CouponDefinition, Discount};
    use event_store::InMemoryEventStore;

    struct Harness {
        saga: PurchaseSaga<InMemoryEventStore>,
        bookings: Arc<BookingRegistry<InMemoryEventStore>>,
        coupons: Arc<CouponLedger<InMemoryEventStore>>,
        gateway: InMemoryPaymentGateway,
        notifier: InMemoryNotifier,
    }

    fn harness() -> Harness {
        let store = InMemoryEventStore::new();
        let clock: SharedClock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
        ));
        let availability = Arc::new(AvailabilityEngine::new(
            store.clone(),
            BusinessHours::default(),
            clock.clone(),
        ));
        let bookings = Arc::new(BookingRegistry::new(
            store.clone(),
            availability,
            Arc::new(Catalog::standard()),
            clock.clone(),
        ));
        let coupons = Arc::new(CouponLedger::new(store.clone(), clock.clone()));
        let gateway = InMemoryPaymentGateway::new();
        let payments = Arc::new(PaymentCoordinator::new(
            store.clone(),
            Arc::new(gateway.clone()),
            PaymentSettings::default(),
            clock.clone(),
        ));
        let notifier = InMemoryNotifier::new();
        let notifications = Arc::new(NotificationScheduler::new(
            store.clone(),
            Arc::new(notifier.clone()),
            clock.clone(),
        ));
        let saga = PurchaseSaga::new(
            store,
            bookings.clone(),
            coupons.clone(),
            payments,
            notifications,
            clock,
        );
        Harness {
            saga,
            bookings,
            coupons,
            gateway,
            notifier,
        }
    }

    fn monday_nine() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn request(attendees: usize, coupon: Option<&str>) -> PurchaseRequest {
        PurchaseRequest {
            product_id: "ai-leadership-3day".into(),
            start: monday_nine(),
            attendees: (0..attendees)
                .map(|i| Attendee {
                    name: format!("Attendee {i}"),
                    email: format!("attendee{i}@example.com"),
                })
                .collect(),
            contact: Contact {
                name: "Grace Hopper".to_string(),
                email: "grace@example.com".to_string(),
                phone: None,
            },
            coupon_code: coupon.map(str::to_string),
            payment_source: "tok_visa".to_string(),
        }
    }

    #[tokio::test]
    async fn test_happy_path() {
        let h = harness();
        let result = h.saga.process_purchase(request(2, None)).await.unwrap();

        assert_eq!(result.status, PurchaseStatus::Completed);
        assert_eq!(result.total_amount, Money::from_dollars(6000));
        assert_eq!(result.amount_charged, Money::from_dollars(6000));
        let confirmation = result.confirmation_number.clone().unwrap();
        assert!(confirmation.starts_with("WS-"));
        assert_eq!(confirmation.len(), 11);
        assert!(result.receipt_url.is_some());

        let booking = h.bookings.get_booking(result.booking_id.unwrap()).await.unwrap();
        assert_eq!(booking.status(), domain::BookingStatus::Confirmed);
        assert_eq!(h.gateway.capture_count(), 1);
        assert_eq!(
            h.saga.get_purchase_status(result.purchase_id).await.unwrap(),
            PurchaseStatus::Completed
        );
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_validation_records_nothing() {
        let h = harness();
        let result = h.saga.process_purchase(request(0, None)).await;
        assert!(matches!(result, Err(SagaError::Validation(_))));

        let mut unknown = request(1, None);
        unknown.product_id = "nope".into();
        let result = h.saga.process_purchase(unknown).await;
        assert!(matches!(
            result,
            Err(SagaError::Domain(DomainError::ProductNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_booking_failure_fails_without_compensation() {
        let h = harness();
        let result = h.saga.process_purchase(request(13, None)).await.unwrap();

        assert_eq!(result.status, PurchaseStatus::Failed);
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::Capacity));
        assert!(result.booking_id.is_none());
        let purchase = h.saga.get_purchase(result.purchase_id).await.unwrap();
        assert!(purchase.compensated_steps().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_coupon_cancels_booking() {
        let h = harness();
        let result = h
            .saga
            .process_purchase(request(1, Some("NOPE")))
            .await
            .unwrap();

        assert_eq!(result.status, PurchaseStatus::Failed);
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::NotFound));
        let booking = h.bookings.get_booking(result.booking_id.unwrap()).await.unwrap();
        assert_eq!(booking.status(), domain::BookingStatus::Cancelled);
        assert_eq!(h.gateway.capture_count(), 0);
    }

    #[tokio::test]
    async fn test_declined_payment_releases_coupon() {
        let h = harness();
        h.coupons
            .create_coupon(CouponDefinition {
                code: CouponCode::parse("ONCE").unwrap(),
                discount: Discount::Percentage(10),
                minimum_amount: Money::zero(),
                usage_limit: 1,
                expires_at: None,
            })
            .await
            .unwrap();
        h.gateway.set_decline(true);

        let result = h
            .saga
            .process_purchase(request(1, Some("once")))
            .await
            .unwrap();
        assert_eq!(result.status, PurchaseStatus::Failed);
        assert_eq!(
            result.error_kind,
            Some(crate::error::ErrorKind::PaymentDeclined)
        );
        assert_eq!(h.coupons.get_coupon_usage("ONCE").await.unwrap().total_usage, 0);
    }

    #[tokio::test]
    async fn test_cancel_requires_completed_purchase() {
        let h = harness();
        h.gateway.set_decline(true);
        let failed = h.saga.process_purchase(request(1, None)).await.unwrap();

        assert!(matches!(
            h.saga.cancel_purchase(failed.purchase_id).await,
            Err(SagaError::InvalidState { .. })
        ));
        assert!(matches!(
            h.saga.cancel_purchase(AggregateId::new()).await,
            Err(SagaError::PurchaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_refund_parks_cancellation() {
        let h = harness();
        let result = h.saga.process_purchase(request(1, None)).await.unwrap();

        h.gateway.set_fail_refunds(true);
        let parked = h.saga.cancel_purchase(result.purchase_id).await.unwrap();
        assert_eq!(parked.status, PurchaseStatus::Compensating);
        assert_eq!(h.saga.pending_compensations(), vec![result.purchase_id]);

        h.gateway.set_fail_refunds(false);
        assert_eq!(h.saga.retry_pending_compensations().await.unwrap(), 1);
        assert!(h.saga.pending_compensations().is_empty());

        let purchase = h.saga.get_purchase(result.purchase_id).await.unwrap();
        assert_eq!(purchase.status(), PurchaseStatus::Cancelled);
        assert_eq!(purchase.refunded_amount(), Money::from_dollars(3000));
        assert_eq!(h.gateway.refund_count(), 1);
    }
}
