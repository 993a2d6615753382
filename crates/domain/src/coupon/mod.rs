//! Discount codes and their redemption counters.

mod aggregate;
mod events;
mod ledger;

pub use aggregate::Coupon;
pub use events::{
    CouponAppliedData, CouponCreatedData, CouponDeactivatedData, CouponEvent, CouponReleasedData,
};
pub use ledger::{CouponLedger, CouponUsage, CouponValidation};

use chrono::{DateTime, Utc};
use common::{Money, StreamId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DomainError;

const MAX_CODE_LEN: usize = 32;

/// A coupon code, trimmed and upper-cased. Letters, digits, `-` and `_` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CouponCode(String);

impl CouponCode {
    pub fn parse(raw: &str) -> Result<Self, CouponError> {
        let code = raw.trim().to_ascii_uppercase();
        let well_formed = !code.is_empty()
            && code.len() <= MAX_CODE_LEN
            && code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !well_formed {
            return Err(CouponError::MalformedCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn stream_id(&self) -> StreamId {
        StreamId::of("coupon", &self.0)
    }
}

impl std::fmt::Display for CouponCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Discount {
    Percentage(u32),
    Fixed(Money),
}

impl Discount {
    /// The amount taken off `order`: a percentage rounded down to the cent,
    /// or a fixed amount capped at the order total.
    pub fn amount_for(&self, order: Money) -> Money {
        match *self {
            Discount::Percentage(percent) => order.percent(percent.min(100)),
            Discount::Fixed(value) => value.min(order),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponDefinition {
    pub code: CouponCode,
    pub discount: Discount,
    #[serde(default = "Money::zero")]
    pub minimum_amount: Money,
    pub usage_limit: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CouponDefinition {
    pub fn validate(&self) -> Result<(), CouponError> {
        let problem = match self.discount {
            Discount::Percentage(p) if p == 0 || p > 100 => {
                Some(format!("percentage must be between 1 and 100, got {p}"))
            }
            Discount::Fixed(v) if !v.is_positive() => {
                Some(format!("fixed discount must be positive, got {v}"))
            }
            _ if self.usage_limit == 0 => Some("usage limit must be at least 1".to_string()),
            _ if self.minimum_amount.cents() < 0 => {
                Some("minimum amount cannot be negative".to_string())
            }
            _ => None,
        };
        match problem {
            Some(p) => Err(CouponError::InvalidDefinition(p)),
            None => Ok(()),
        }
    }
}

/// Why a coupon cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CouponRejection {
    NotFound,
    Inactive,
    Expired,
    UsageLimitExceeded,
    BelowMinimum { minimum: Money },
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CouponRejection::NotFound => f.write_str("coupon not found"),
            CouponRejection::Inactive => f.write_str("coupon is not active"),
            CouponRejection::Expired => f.write_str("coupon has expired"),
            CouponRejection::UsageLimitExceeded => f.write_str("usage limit exceeded"),
            CouponRejection::BelowMinimum { minimum } => {
                write!(f, "order amount is below the minimum of {minimum}")
            }
        }
    }
}

/// Errors that can occur during coupon operations.
#[derive(Debug, Error)]
pub enum CouponError {
    #[error("Malformed coupon code: {0:?}")]
    MalformedCode(String),

    #[error("Invalid coupon definition: {0}")]
    InvalidDefinition(String),

    #[error("Coupon {0} already exists")]
    AlreadyExists(CouponCode),

    #[error("Coupon does not exist")]
    NotCreated,

    #[error("Coupon {code} rejected: {reason}")]
    Rejected {
        code: CouponCode,
        reason: CouponRejection,
    },
}

impl From<CouponError> for DomainError {
    fn from(e: CouponError) -> Self {
        match e {
            CouponError::MalformedCode(_)
            | CouponError::InvalidDefinition(_)
            | CouponError::NotCreated => DomainError::Validation(e.to_string()),
            CouponError::AlreadyExists(code) => DomainError::CouponExists(code.to_string()),
            CouponError::Rejected {
                code,
                reason: CouponRejection::NotFound,
            } => DomainError::CouponNotFound(code.to_string()),
            CouponError::Rejected { code, reason } => DomainError::CouponInvalid {
                code: code.to_string(),
                reason,
            },
        }
    }
}
