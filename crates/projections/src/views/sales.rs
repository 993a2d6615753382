//! Sales read model: how purchases ended and how much money moved.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, StreamId};
use domain::ProductId;
use event_store::EventEnvelope;
use saga::PurchaseEvent;
use saga::purchase_flow::SAGA_TYPE;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// Completed sales of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    pub product_id: ProductId,
    pub product_name: String,
    pub completed: u64,
    pub cancelled: u64,
    /// Seats sold by completed purchases, cancelled ones included.
    pub seats: u64,
    /// Amount charged by completed purchases, before refunds.
    pub revenue: Money,
}

/// Totals over every purchase seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Failures keyed by error kind, e.g. `payment_declined`.
    pub failures_by_kind: BTreeMap<String, u64>,
    /// Everything the gateway captured, including captures later refunded.
    pub gross_captured: Money,
    pub refunded: Money,
    /// Discounts on purchases that completed.
    pub discounts_granted: Money,
    pub net_revenue: Money,
    pub products: Vec<ProductSales>,
}

#[derive(Debug, Clone)]
struct PurchaseLine {
    product_id: ProductId,
    seats: u64,
    discount: Money,
    charged: Money,
}

#[derive(Debug, Default)]
struct SalesState {
    summary: SalesSummary,
    purchases: HashMap<StreamId, PurchaseLine>,
    products: BTreeMap<ProductId, ProductSales>,
}

impl SalesState {
    fn apply(&mut self, stream_id: &StreamId, event: PurchaseEvent) {
        let summary = &mut self.summary;
        match event {
            PurchaseEvent::PurchaseStarted(data) => {
                summary.started += 1;
                self.products
                    .entry(data.product_id.clone())
                    .or_insert_with(|| ProductSales {
                        product_id: data.product_id.clone(),
                        product_name: data.product_name.clone(),
                        completed: 0,
                        cancelled: 0,
                        seats: 0,
                        revenue: Money::zero(),
                    });
                self.purchases.insert(
                    stream_id.clone(),
                    PurchaseLine {
                        product_id: data.product_id,
                        seats: data.attendees.len() as u64,
                        discount: Money::zero(),
                        charged: Money::zero(),
                    },
                );
            }
            PurchaseEvent::DiscountApplied(data) => {
                if let Some(line) = self.purchases.get_mut(stream_id) {
                    line.discount = data.discount_amount;
                }
            }
            PurchaseEvent::PaymentCaptured(data) => {
                summary.gross_captured += data.paid_amount;
                if let Some(line) = self.purchases.get_mut(stream_id) {
                    line.charged = data.paid_amount;
                }
            }
            PurchaseEvent::RefundIssued(data) => {
                summary.refunded += data.amount;
            }
            PurchaseEvent::PurchaseCompleted(_) => {
                summary.completed += 1;
                if let Some(line) = self.purchases.get(stream_id) {
                    summary.discounts_granted += line.discount;
                    if let Some(product) = self.products.get_mut(&line.product_id) {
                        product.completed += 1;
                        product.seats += line.seats;
                        product.revenue += line.charged;
                    }
                }
            }
            PurchaseEvent::PurchaseFailed(data) => {
                summary.failed += 1;
                let kind = data
                    .kind
                    .map(|k| k.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                *summary.failures_by_kind.entry(kind).or_default() += 1;
            }
            PurchaseEvent::PurchaseCancelled(_) => {
                summary.cancelled += 1;
                if let Some(line) = self.purchases.get(stream_id)
                    && let Some(product) = self.products.get_mut(&line.product_id)
                {
                    product.cancelled += 1;
                }
            }
            PurchaseEvent::BookingCreated(_)
            | PurchaseEvent::PaymentFailed(_)
            | PurchaseEvent::CompensationStarted(_)
            | PurchaseEvent::CompensationStepCompleted(_)
            | PurchaseEvent::CompensationStepFailed(_) => {}
        }
    }

    fn snapshot(&self) -> SalesSummary {
        let mut summary = self.summary.clone();
        summary.net_revenue = summary.gross_captured.saturating_sub(summary.refunded);
        summary.products = self.products.values().cloned().collect();
        summary
    }
}

/// Sales figures folded from purchase streams.
#[derive(Clone, Default)]
pub struct SalesView {
    state: Arc<RwLock<SalesState>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl SalesView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn summary(&self) -> SalesSummary {
        self.state.read().await.snapshot()
    }

    pub async fn product(&self, product_id: &ProductId) -> Option<ProductSales> {
        self.state.read().await.products.get(product_id).cloned()
    }
}

#[async_trait]
impl Projection for SalesView {
    fn name(&self) -> &'static str {
        "SalesView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type == SAGA_TYPE {
            let purchase_event: PurchaseEvent = event.decode()?;
            self.state
                .write()
                .await
                .apply(&event.stream_id, purchase_event);
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance();
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = SalesState::default();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for SalesView {
    fn name(&self) -> &'static str {
        "SalesView"
    }

    fn count(&self) -> usize {
        // Returns 0 while a write holds the lock.
        self.state
            .try_read()
            .map(|s| s.purchases.len())
            .unwrap_or(0)
    }
}
