//! Products offered for sale.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use common::Money;
use serde::{Deserialize, Serialize};

/// Identifier of a catalog product, e.g. `ai-leadership-3day`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductKind {
    /// Group session running `days` consecutive days, `hours_per_day` each.
    Workshop { days: u32, hours_per_day: u32 },
    /// One-off consulting block of `hours` hours.
    Consulting { hours: u32 },
}

impl ProductKind {
    pub fn is_workshop(&self) -> bool {
        matches!(self, ProductKind::Workshop { .. })
    }

    /// Prefix of confirmation numbers for purchases of this kind.
    pub fn confirmation_prefix(&self) -> &'static str {
        match self {
            ProductKind::Workshop { .. } => "WS",
            ProductKind::Consulting { .. } => "CN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub kind: ProductKind,
    /// Price per attendee.
    pub base_price: Money,
    /// Default number of seats of each session.
    pub capacity: u32,
}

impl Product {
    /// Returns when a session starting at `start` ends.
    pub fn session_end(&self, start: NaiveDateTime) -> NaiveDateTime {
        match self.kind {
            ProductKind::Workshop {
                days,
                hours_per_day,
            } => {
                start + Duration::days(i64::from(days.max(1)) - 1)
                    + Duration::hours(i64::from(hours_per_day))
            }
            ProductKind::Consulting { hours } => start + Duration::hours(i64::from(hours)),
        }
    }

    /// Every calendar day a session starting at `start` touches.
    pub fn session_days(&self, start: NaiveDateTime) -> Vec<NaiveDate> {
        let end = self.session_end(start);
        let last = if end.time() == chrono::NaiveTime::MIN && end.date() > start.date() {
            end.date() - Duration::days(1)
        } else {
            end.date()
        };
        start
            .date()
            .iter_days()
            .take_while(|d| *d <= last)
            .collect()
    }

    /// Price of a booking for `attendees` people.
    pub fn price_for(&self, attendees: u32) -> Money {
        self.base_price.multiply(attendees)
    }
}

/// Immutable set of products, shared by every component that prices or
/// schedules purchases.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: HashMap<ProductId, Product>,
}

impl Catalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// The products sold by the public site.
    pub fn standard() -> Self {
        Self::new([
            Product {
                id: ProductId::new("ai-leadership-3day"),
                name: "AI Leadership Workshop (3 days)".to_string(),
                kind: ProductKind::Workshop {
                    days: 3,
                    hours_per_day: 8,
                },
                base_price: Money::from_dollars(3000),
                capacity: 12,
            },
            Product {
                id: ProductId::new("ai-foundations-1day"),
                name: "AI Foundations Workshop (1 day)".to_string(),
                kind: ProductKind::Workshop {
                    days: 1,
                    hours_per_day: 8,
                },
                base_price: Money::from_dollars(1200),
                capacity: 20,
            },
            Product {
                id: ProductId::new("consulting-2h"),
                name: "Strategy Consulting (2 hours)".to_string(),
                kind: ProductKind::Consulting { hours: 2 },
                base_price: Money::from_dollars(500),
                capacity: 4,
            },
        ])
    }

    pub fn get(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }
}
