//! Coupon aggregate: definition plus the set of live redemptions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, Money};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    CouponAppliedData, CouponCreatedData, CouponDeactivatedData, CouponDefinition, CouponError,
    CouponEvent, CouponRejection, CouponReleasedData,
};

/// A discount code. `usage() <= usage_limit` holds after every event.
#[derive(Debug, Clone, Default)]
pub struct Coupon {
    definition: Option<CouponDefinition>,
    active: bool,
    redemptions: HashMap<AggregateId, Money>,
    created_at: Option<DateTime<Utc>>,
    version: Version,
}

impl Aggregate for Coupon {
    type Event = CouponEvent;
    type Error = CouponError;

    fn aggregate_type() -> &'static str {
        "Coupon"
    }

    fn exists(&self) -> bool {
        self.definition.is_some()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CouponEvent::CouponCreated(data) => {
                self.definition = Some(data.definition);
                self.created_at = Some(data.created_at);
                self.active = true;
            }
            CouponEvent::CouponApplied(data) => {
                self.redemptions.insert(data.redemption_id, data.discount);
            }
            CouponEvent::CouponReleased(data) => {
                self.redemptions.remove(&data.redemption_id);
            }
            CouponEvent::CouponDeactivated(_) => {
                self.active = false;
            }
        }
    }
}

// Query methods
impl Coupon {
    pub fn definition(&self) -> Option<&CouponDefinition> {
        self.definition.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Number of uses currently held.
    pub fn usage(&self) -> u32 {
        u32::try_from(self.redemptions.len()).unwrap_or(u32::MAX)
    }

    pub fn usage_limit(&self) -> u32 {
        self.definition.as_ref().map_or(0, |d| d.usage_limit)
    }

    pub fn remaining_uses(&self) -> u32 {
        self.usage_limit().saturating_sub(self.usage())
    }

    /// The discount recorded for a redemption, if it is still held.
    pub fn redemption(&self, redemption_id: &AggregateId) -> Option<Money> {
        self.redemptions.get(redemption_id).copied()
    }

    /// Checks whether one more use may be taken at `now`, optionally for an
    /// order of `amount`.
    pub fn check(&self, amount: Option<Money>, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        let Some(definition) = &self.definition else {
            return Err(CouponRejection::NotFound);
        };
        if !self.active {
            return Err(CouponRejection::Inactive);
        }
        if definition.expires_at.is_some_and(|expires| expires <= now) {
            return Err(CouponRejection::Expired);
        }
        if self.usage() >= definition.usage_limit {
            return Err(CouponRejection::UsageLimitExceeded);
        }
        if let Some(amount) = amount
            && amount < definition.minimum_amount
        {
            return Err(CouponRejection::BelowMinimum {
                minimum: definition.minimum_amount,
            });
        }
        Ok(())
    }
}

// Command methods (return events)
impl Coupon {
    pub fn create(
        &self,
        definition: CouponDefinition,
        at: DateTime<Utc>,
    ) -> Result<Vec<CouponEvent>, CouponError> {
        if let Some(existing) = &self.definition {
            return Err(CouponError::AlreadyExists(existing.code.clone()));
        }
        definition.validate()?;
        Ok(vec![CouponEvent::CouponCreated(CouponCreatedData {
            definition,
            created_at: at,
        })])
    }

    /// Takes one use for `redemption_id`.
    ///
    /// The check and the increment are one event decided on one version.
    /// Re-applying a held redemption produces nothing.
    pub fn apply_to(
        &self,
        redemption_id: AggregateId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Vec<CouponEvent>, CouponError> {
        let definition = self.definition.as_ref().ok_or(CouponError::NotCreated)?;
        if self.redemptions.contains_key(&redemption_id) {
            return Ok(vec![]);
        }
        self.check(Some(amount), now)
            .map_err(|reason| CouponError::Rejected {
                code: definition.code.clone(),
                reason,
            })?;

        Ok(vec![CouponEvent::CouponApplied(CouponAppliedData {
            redemption_id,
            order_amount: amount,
            discount: definition.discount.amount_for(amount),
            applied_at: now,
        })])
    }

    /// Gives a use back. No-op for unknown or already released redemptions.
    pub fn release(
        &self,
        redemption_id: AggregateId,
        at: DateTime<Utc>,
    ) -> Result<Vec<CouponEvent>, CouponError> {
        if !self.exists() {
            return Err(CouponError::NotCreated);
        }
        if !self.redemptions.contains_key(&redemption_id) {
            return Ok(vec![]);
        }
        Ok(vec![CouponEvent::CouponReleased(CouponReleasedData {
            redemption_id,
            released_at: at,
        })])
    }

    pub fn deactivate(&self, at: DateTime<Utc>) -> Result<Vec<CouponEvent>, CouponError> {
        if !self.exists() {
            return Err(CouponError::NotCreated);
        }
        if !self.active {
            return Ok(vec![]);
        }
        Ok(vec![CouponEvent::CouponDeactivated(CouponDeactivatedData {
            deactivated_at: at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupon::{CouponCode, Discount};
    use chrono::Duration;

    fn coupon(limit: u32, minimum: Money, expires_at: Option<DateTime<Utc>>) -> Coupon {
        let definition = CouponDefinition {
            code: CouponCode::parse("SAVE20").unwrap(),
            discount: Discount::Percentage(20),
            minimum_amount: minimum,
            usage_limit: limit,
            expires_at,
        };
        let mut coupon = Coupon::default();
        let events = coupon.create(definition, Utc::now()).unwrap();
        coupon.apply_events(events);
        coupon
    }

    fn redeem(coupon: &mut Coupon, amount: Money) -> AggregateId {
        let id = AggregateId::new();
        let events = coupon.apply_to(id, amount, Utc::now()).unwrap();
        coupon.apply_events(events);
        id
    }

    #[test]
    fn test_apply_records_discount() {
        let mut coupon = coupon(100, Money::zero(), None);
        let id = redeem(&mut coupon, Money::from_dollars(6000));

        assert_eq!(coupon.redemption(&id), Some(Money::from_dollars(1200)));
        assert_eq!(coupon.usage(), 1);
        assert_eq!(coupon.remaining_uses(), 99);
    }

    #[test]
    fn test_apply_is_idempotent_per_redemption() {
        let mut coupon = coupon(1, Money::zero(), None);
        let id = redeem(&mut coupon, Money::from_dollars(100));

        assert!(
            coupon
                .apply_to(id, Money::from_dollars(100), Utc::now())
                .unwrap()
                .is_empty()
        );
        assert_eq!(coupon.usage(), 1);
    }

    #[test]
    fn test_usage_limit() {
        let mut coupon = coupon(1, Money::zero(), None);
        redeem(&mut coupon, Money::from_dollars(100));

        let result = coupon.apply_to(AggregateId::new(), Money::from_dollars(100), Utc::now());
        assert!(matches!(
            result,
            Err(CouponError::Rejected {
                reason: CouponRejection::UsageLimitExceeded,
                ..
            })
        ));
    }

    #[test]
    fn test_release_frees_a_use_once() {
        let mut coupon = coupon(1, Money::zero(), None);
        let id = redeem(&mut coupon, Money::from_dollars(100));

        let events = coupon.release(id, Utc::now()).unwrap();
        coupon.apply_events(events);
        assert_eq!(coupon.usage(), 0);
        assert!(coupon.release(id, Utc::now()).unwrap().is_empty());
        assert!(
            coupon
                .release(AggregateId::new(), Utc::now())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_check_reasons() {
        let now = Utc::now();

        let expired = coupon(5, Money::zero(), Some(now - Duration::hours(1)));
        assert_eq!(expired.check(None, now), Err(CouponRejection::Expired));

        let minimum = coupon(5, Money::from_dollars(1000), None);
        assert_eq!(
            minimum.check(Some(Money::from_dollars(999)), now),
            Err(CouponRejection::BelowMinimum {
                minimum: Money::from_dollars(1000)
            })
        );
        assert_eq!(minimum.check(None, now), Ok(()));
        assert_eq!(minimum.check(Some(Money::from_dollars(1000)), now), Ok(()));

        let mut inactive = coupon(5, Money::zero(), None);
        let events = inactive.deactivate(now).unwrap();
        inactive.apply_events(events);
        assert_eq!(inactive.check(None, now), Err(CouponRejection::Inactive));
        assert!(inactive.deactivate(now).unwrap().is_empty());

        assert_eq!(
            Coupon::default().check(None, now),
            Err(CouponRejection::NotFound)
        );
    }

    #[test]
    fn test_create_twice() {
        let existing = coupon(5, Money::zero(), None);
        let definition = existing.definition().unwrap().clone();
        assert!(matches!(
            existing.create(definition, Utc::now()),
            Err(CouponError::AlreadyExists(_))
        ));
    }
}
