//! Administrative operations, kept apart from the customer-facing saga.

use std::sync::Arc;

use chrono::NaiveDate;
use common::{AggregateId, Money};
use domain::{
    AvailabilityEngine, BookingRegistry, CalendarBlockout, Coupon, CouponDefinition,
    CouponLedger, CouponUsage, Workshop, WorkshopId,
};
use event_store::EventStore;

use crate::error::SagaError;
use crate::payment::{PaymentCoordinator, PaymentTransaction, RefundResult};

/// Capability handed only to operators: blockouts, coupons, workshop
/// capacity and manual refunds.
pub struct Administration<S: EventStore + Clone> {
    availability: Arc<AvailabilityEngine<S>>,
    coupons: Arc<CouponLedger<S>>,
    bookings: Arc<BookingRegistry<S>>,
    payments: Arc<PaymentCoordinator<S>>,
}

impl<S: EventStore + Clone> Administration<S> {
    pub fn new(
        bookings: Arc<BookingRegistry<S>>,
        coupons: Arc<CouponLedger<S>>,
        payments: Arc<PaymentCoordinator<S>>,
    ) -> Self {
        Self {
            availability: bookings.availability().clone(),
            coupons,
            bookings,
            payments,
        }
    }

    pub async fn block_date(
        &self,
        date: NaiveDate,
        reason: &str,
    ) -> Result<CalendarBlockout, SagaError> {
        Ok(self.availability.block_date(date, reason).await?)
    }

    pub async fn block_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        reason: &str,
    ) -> Result<CalendarBlockout, SagaError> {
        Ok(self.availability.block_range(start, end, reason).await?)
    }

    /// Returns the number of blockout rows that covered `date`.
    pub async fn unblock_date(&self, date: NaiveDate) -> Result<usize, SagaError> {
        Ok(self.availability.unblock_date(date).await?)
    }

    pub async fn remove_blockout(&self, blockout_id: AggregateId) -> Result<(), SagaError> {
        Ok(self.availability.unblock(blockout_id).await?)
    }

    pub async fn list_blockouts(&self) -> Result<Vec<CalendarBlockout>, SagaError> {
        Ok(self.availability.list_blockouts().await?)
    }

    pub async fn create_coupon(&self, definition: CouponDefinition) -> Result<Coupon, SagaError> {
        Ok(self.coupons.create_coupon(definition).await?)
    }

    pub async fn get_coupon(&self, code: &str) -> Result<Coupon, SagaError> {
        Ok(self.coupons.get_coupon(code).await?)
    }

    pub async fn get_coupon_usage(&self, code: &str) -> Result<CouponUsage, SagaError> {
        Ok(self.coupons.get_coupon_usage(code).await?)
    }

    pub async fn deactivate_coupon(&self, code: &str) -> Result<Coupon, SagaError> {
        Ok(self.coupons.deactivate_coupon(code).await?)
    }

    pub async fn get_workshop(&self, workshop_id: &WorkshopId) -> Result<Workshop, SagaError> {
        Ok(self.bookings.get_workshop(workshop_id).await?)
    }

    pub async fn set_workshop_capacity(
        &self,
        workshop_id: &WorkshopId,
        capacity: u32,
    ) -> Result<Workshop, SagaError> {
        Ok(self
            .bookings
            .set_workshop_capacity(workshop_id, capacity)
            .await?)
    }

    pub async fn close_workshop(&self, workshop_id: &WorkshopId) -> Result<Workshop, SagaError> {
        Ok(self.bookings.close_workshop(workshop_id).await?)
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentTransaction, SagaError> {
        self.payments.get_payment_status(payment_id).await
    }

    /// Refunds part or all of a payment outside any purchase flow.
    pub async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<Money>,
    ) -> Result<RefundResult, SagaError> {
        self.payments.process_refund(payment_id, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::{PaymentRequest, PaymentSettings};
    use crate::services::InMemoryPaymentGateway;
    use chrono::{TimeZone, Utc};
    use common::{ManualClock, SharedClock};
    use domain::{BusinessHours, Catalog, CouponCode, Discount};
    use event_store::InMemoryEventStore;

    fn admin() -> Administration<InMemoryEventStore> {
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
        let payments = Arc::new(PaymentCoordinator::new(
            store,
            Arc::new(InMemoryPaymentGateway::new()),
            PaymentSettings::default(),
            clock,
        ));
        Administration::new(bookings, coupons, payments)
    }

    #[tokio::test]
    async fn test_blockouts() {
        let admin = admin();
        let day = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let row = admin.block_date(day, "New Year's Eve").await.unwrap();
        assert_eq!(admin.list_blockouts().await.unwrap(), vec![row.clone()]);

        assert_eq!(admin.unblock_date(day).await.unwrap(), 1);
        assert!(admin.list_blockouts().await.unwrap().is_empty());
        assert!(admin.remove_blockout(row.id).await.is_err());
    }

    #[tokio::test]
    async fn test_coupons() {
        let admin = admin();
        admin
            .create_coupon(CouponDefinition {
                code: CouponCode::parse("SPRING").unwrap(),
                discount: Discount::Fixed(Money::from_dollars(100)),
                minimum_amount: Money::zero(),
                usage_limit: 5,
                expires_at: None,
            })
            .await
            .unwrap();

        assert_eq!(admin.get_coupon_usage("spring").await.unwrap().remaining_uses, 5);
        admin.deactivate_coupon("SPRING").await.unwrap();
        assert!(matches!(
            admin.get_coupon_usage("MISSING").await,
            Err(SagaError::Domain(domain::DomainError::CouponNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_workshop() {
        let admin = admin();
        let result = admin
            .set_workshop_capacity(&WorkshopId::new("missing"), 10)
            .await;
        assert!(matches!(
            result,
            Err(SagaError::Domain(domain::DomainError::WorkshopNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_manual_refund() {
        let admin = admin();
        let payment = admin
            .payments
            .process_payment(&PaymentRequest {
                amount: Money::from_dollars(500),
                currency: "USD".to_string(),
                booking_id: AggregateId::new(),
                idempotency_key: AggregateId::new().to_string(),
                source: "tok_visa".to_string(),
            })
            .await
            .unwrap();

        let refund = admin
            .refund_payment(&payment.payment_id, Some(Money::from_dollars(200)))
            .await
            .unwrap();
        assert_eq!(refund.amount, Money::from_dollars(200));
        let recorded = admin.get_payment(&payment.payment_id).await.unwrap();
        assert_eq!(recorded.refundable(), Money::from_dollars(300));
    }
}
