//! Coupon domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, Money};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::CouponDefinition;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CouponEvent {
    CouponCreated(CouponCreatedData),

    /// One use taken. `redemption_id` is the purchase the discount went to.
    CouponApplied(CouponAppliedData),

    /// A use given back by compensation.
    CouponReleased(CouponReleasedData),

    CouponDeactivated(CouponDeactivatedData),
}

impl DomainEvent for CouponEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CouponEvent::CouponCreated(_) => "CouponCreated",
            CouponEvent::CouponApplied(_) => "CouponApplied",
            CouponEvent::CouponReleased(_) => "CouponReleased",
            CouponEvent::CouponDeactivated(_) => "CouponDeactivated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCreatedData {
    pub definition: CouponDefinition,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponAppliedData {
    pub redemption_id: AggregateId,
    pub order_amount: Money,
    pub discount: Money,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponReleasedData {
    pub redemption_id: AggregateId,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponDeactivatedData {
    pub deactivated_at: DateTime<Utc>,
}
