//! Coupon ledger: validation, redemption and admin operations.

use common::{AggregateId, Money, SharedClock};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::command::CommandHandler;
use crate::error::DomainError;

use super::{Coupon, CouponCode, CouponDefinition, CouponRejection, Discount};

/// Result of a read-only coupon check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponValidation {
    pub is_valid: bool,
    pub reason: Option<CouponRejection>,
    pub discount: Option<Discount>,
    pub minimum_amount: Option<Money>,
    pub usage: Option<CouponUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub total_usage: u32,
    pub usage_limit: u32,
    pub remaining_uses: u32,
}

impl From<&Coupon> for CouponUsage {
    fn from(coupon: &Coupon) -> Self {
        Self {
            total_usage: coupon.usage(),
            usage_limit: coupon.usage_limit(),
            remaining_uses: coupon.remaining_uses(),
        }
    }
}

/// Owns every coupon stream.
///
/// Redemptions are keyed by the purchase they belong to, so applying and
/// releasing are both safe to repeat.
pub struct CouponLedger<S: EventStore> {
    handler: CommandHandler<S, Coupon>,
    clock: SharedClock,
}

impl<S: EventStore> CouponLedger<S> {
    pub fn new(store: S, clock: SharedClock) -> Self {
        Self {
            handler: CommandHandler::new(store),
            clock,
        }
    }

    #[tracing::instrument(skip(self), fields(code = %definition.code))]
    pub async fn create_coupon(&self, definition: CouponDefinition) -> Result<Coupon, DomainError> {
        let at = self.clock.now();
        let stream = definition.code.stream_id();
        let result = self
            .handler
            .execute(&stream, |coupon| coupon.create(definition, at))
            .await?;
        tracing::info!("coupon created");
        Ok(result.aggregate)
    }

    pub async fn get_coupon(&self, code: &str) -> Result<Coupon, DomainError> {
        let code = CouponCode::parse(code)?;
        self.handler
            .load_existing(&code.stream_id())
            .await?
            .ok_or_else(|| DomainError::CouponNotFound(code.to_string()))
    }

    /// Checks a code without taking a use.
    pub async fn validate_coupon(
        &self,
        code: &str,
        amount: Option<Money>,
    ) -> Result<CouponValidation, DomainError> {
        let code = CouponCode::parse(code)?;
        let coupon = self.handler.load(&code.stream_id()).await?;

        let Some(definition) = coupon.definition() else {
            return Ok(CouponValidation {
                is_valid: false,
                reason: Some(CouponRejection::NotFound),
                discount: None,
                minimum_amount: None,
                usage: None,
            });
        };

        let reason = coupon.check(amount, self.clock.now()).err();
        Ok(CouponValidation {
            is_valid: reason.is_none(),
            reason,
            discount: Some(definition.discount),
            minimum_amount: Some(definition.minimum_amount),
            usage: Some(CouponUsage::from(&coupon)),
        })
    }

    /// Takes one use of `code` for `redemption_id` and returns the discount
    /// on `amount`.
    ///
    /// Concurrent callers race on the coupon's version; the loser re-checks
    /// against the winner's state, so the last use is never handed out twice.
    #[tracing::instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        code: &str,
        amount: Money,
        redemption_id: AggregateId,
    ) -> Result<Money, DomainError> {
        let code = CouponCode::parse(code)?;
        let stream = code.stream_id();
        if self.handler.load_existing(&stream).await?.is_none() {
            return Err(DomainError::CouponNotFound(code.to_string()));
        }

        let now = self.clock.now();
        let result = self
            .handler
            .execute_with_retry(&stream, |coupon| coupon.apply_to(redemption_id, amount, now))
            .await
            .inspect_err(|e| {
                if matches!(e, DomainError::CouponInvalid { .. }) {
                    metrics::counter!("coupon_rejections_total").increment(1);
                }
            })?;

        let discount = result
            .aggregate
            .redemption(&redemption_id)
            .unwrap_or_else(Money::zero);
        if !result.events.is_empty() {
            tracing::info!(%code, %discount, "coupon applied");
            metrics::counter!("coupon_redemptions_total").increment(1);
        }
        Ok(discount)
    }

    /// Gives back the use held by `redemption_id`. Returns false if there was
    /// nothing to give back.
    #[tracing::instrument(skip(self))]
    pub async fn release_coupon(
        &self,
        code: &str,
        redemption_id: AggregateId,
    ) -> Result<bool, DomainError> {
        let code = CouponCode::parse(code)?;
        let stream = code.stream_id();
        if self.handler.load_existing(&stream).await?.is_none() {
            return Err(DomainError::CouponNotFound(code.to_string()));
        }

        let at = self.clock.now();
        let result = self
            .handler
            .execute_with_retry(&stream, |coupon| coupon.release(redemption_id, at))
            .await?;

        let released = !result.events.is_empty();
        if released {
            tracing::info!(%code, "coupon use released");
            metrics::counter!("coupon_releases_total").increment(1);
        }
        Ok(released)
    }

    pub async fn get_coupon_usage(&self, code: &str) -> Result<CouponUsage, DomainError> {
        let coupon = self.get_coupon(code).await?;
        Ok(CouponUsage::from(&coupon))
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate_coupon(&self, code: &str) -> Result<Coupon, DomainError> {
        let code = CouponCode::parse(code)?;
        let stream = code.stream_id();
        if self.handler.load_existing(&stream).await?.is_none() {
            return Err(DomainError::CouponNotFound(code.to_string()));
        }

        let at = self.clock.now();
        let result = self
            .handler
            .execute_with_retry(&stream, |coupon| coupon.deactivate(at))
            .await?;
        Ok(result.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use common::ManualClock;
    use event_store::InMemoryEventStore;
    use std::sync::Arc;

    fn ledger() -> (CouponLedger<InMemoryEventStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap(),
        ));
        let ledger = CouponLedger::new(InMemoryEventStore::new(), clock.clone());
        (ledger, clock)
    }

    fn definition(code: &str, discount: Discount, usage_limit: u32) -> CouponDefinition {
        CouponDefinition {
            code: CouponCode::parse(code).unwrap(),
            discount,
            minimum_amount: Money::zero(),
            usage_limit,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_save20_on_two_seats() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("SAVE20", Discount::Percentage(20), 100))
            .await
            .unwrap();

        let discount = ledger
            .apply_coupon("save20", Money::from_dollars(6000), AggregateId::new())
            .await
            .unwrap();
        assert_eq!(discount, Money::from_dollars(1200));

        let usage = ledger.get_coupon_usage("SAVE20").await.unwrap();
        assert_eq!(usage.total_usage, 1);
        assert_eq!(usage.remaining_uses, 99);
    }

    #[tokio::test]
    async fn test_maxed_out_coupon() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("MAXEDOUT", Discount::Percentage(10), 1))
            .await
            .unwrap();
        ledger
            .apply_coupon("MAXEDOUT", Money::from_dollars(100), AggregateId::new())
            .await
            .unwrap();

        let validation = ledger.validate_coupon("MAXEDOUT", None).await.unwrap();
        assert!(!validation.is_valid);
        assert_eq!(validation.reason, Some(CouponRejection::UsageLimitExceeded));

        let err = ledger
            .apply_coupon("MAXEDOUT", Money::from_dollars(100), AggregateId::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("usage limit exceeded"));
    }

    #[tokio::test]
    async fn test_validate_does_not_consume() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("ONCE", Discount::Fixed(Money::from_dollars(50)), 1))
            .await
            .unwrap();

        for _ in 0..3 {
            let validation = ledger
                .validate_coupon("ONCE", Some(Money::from_dollars(100)))
                .await
                .unwrap();
            assert!(validation.is_valid);
        }
        assert_eq!(ledger.get_coupon_usage("ONCE").await.unwrap().total_usage, 0);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_codes() {
        let (ledger, _) = ledger();

        let validation = ledger.validate_coupon("NOPE", None).await.unwrap();
        assert_eq!(validation.reason, Some(CouponRejection::NotFound));

        assert!(matches!(
            ledger
                .apply_coupon("NOPE", Money::from_dollars(10), AggregateId::new())
                .await,
            Err(DomainError::CouponNotFound(_))
        ));
        assert!(matches!(
            ledger.get_coupon_usage("NOPE").await,
            Err(DomainError::CouponNotFound(_))
        ));
        assert!(matches!(
            ledger.validate_coupon("bad code!", None).await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_code() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("DUP", Discount::Percentage(5), 10))
            .await
            .unwrap();
        let result = ledger
            .create_coupon(definition("dup", Discount::Percentage(5), 10))
            .await;
        assert!(matches!(result, Err(DomainError::CouponExists(_))));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("BACK", Discount::Percentage(10), 1))
            .await
            .unwrap();
        let purchase = AggregateId::new();
        ledger
            .apply_coupon("BACK", Money::from_dollars(100), purchase)
            .await
            .unwrap();

        assert!(ledger.release_coupon("BACK", purchase).await.unwrap());
        assert!(!ledger.release_coupon("BACK", purchase).await.unwrap());
        assert_eq!(ledger.get_coupon_usage("BACK").await.unwrap().total_usage, 0);

        // The released use can be taken again.
        ledger
            .apply_coupon("BACK", Money::from_dollars(100), AggregateId::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expiry_follows_clock() {
        let (ledger, clock) = ledger();
        let mut definition = definition("SOON", Discount::Percentage(10), 10);
        definition.expires_at = Some(Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).unwrap());
        ledger.create_coupon(definition).await.unwrap();

        assert!(ledger.validate_coupon("SOON", None).await.unwrap().is_valid);

        clock.advance(Duration::days(2));
        let validation = ledger.validate_coupon("SOON", None).await.unwrap();
        assert_eq!(validation.reason, Some(CouponRejection::Expired));
    }

    #[tokio::test]
    async fn test_deactivated_coupon_is_rejected() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("OFF", Discount::Percentage(10), 10))
            .await
            .unwrap();
        ledger.deactivate_coupon("OFF").await.unwrap();

        assert!(matches!(
            ledger
                .apply_coupon("OFF", Money::from_dollars(100), AggregateId::new())
                .await,
            Err(DomainError::CouponInvalid {
                reason: CouponRejection::Inactive,
                ..
            })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_respect_limit() {
        let (ledger, _) = ledger();
        ledger
            .create_coupon(definition("LAST", Discount::Percentage(50), 1))
            .await
            .unwrap();
        let ledger = Arc::new(ledger);

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger
                    .apply_coupon("LAST", Money::from_dollars(100), AggregateId::new())
                    .await
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(ledger.get_coupon_usage("LAST").await.unwrap().total_usage, 1);
    }
}
