//! Administrative endpoints: blockouts, coupons, workshops and sales.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use common::Money;
use domain::{
    CalendarBlockout, Coupon, CouponCode, CouponDefinition, Discount, DomainError, Workshop,
    WorkshopId,
};
use event_store::EventStore;
use projections::SalesSummary;
use serde::{Deserialize, Serialize};

use super::availability::parse_date;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct BlockRequest {
    pub start: NaiveDate,
    /// Last blocked day; defaults to `start`.
    pub end: Option<NaiveDate>,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct BlockoutQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    pub discount: Discount,
    pub minimum_amount: Option<Money>,
    pub usage_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct CapacityRequest {
    pub capacity: u32,
}

// -- Response types --

#[derive(Serialize)]
pub struct BlockoutList {
    pub blockouts: Vec<CalendarBlockout>,
    /// Distinct blocked days, present when a range was asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_dates: Option<Vec<NaiveDate>>,
}

#[derive(Serialize)]
pub struct UnblockResponse {
    pub date: NaiveDate,
    pub blockouts_lifted: usize,
}

#[derive(Serialize)]
pub struct CouponResponse {
    pub code: String,
    pub discount: Option<Discount>,
    pub minimum_amount: Money,
    pub usage_limit: u32,
    pub total_usage: u32,
    pub remaining_uses: u32,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&Coupon> for CouponResponse {
    fn from(coupon: &Coupon) -> Self {
        let definition = coupon.definition();
        Self {
            code: definition
                .map(|d| d.code.as_str().to_string())
                .unwrap_or_default(),
            discount: definition.map(|d| d.discount),
            minimum_amount: definition.map_or(Money::zero(), |d| d.minimum_amount),
            usage_limit: coupon.usage_limit(),
            total_usage: coupon.usage(),
            remaining_uses: coupon.remaining_uses(),
            active: coupon.is_active(),
            expires_at: definition.and_then(|d| d.expires_at),
            created_at: coupon.created_at(),
        }
    }
}

#[derive(Serialize)]
pub struct WorkshopResponse {
    pub id: String,
    pub product_id: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub capacity: u32,
    pub attendees: u32,
    pub remaining: u32,
    pub bookings: usize,
    pub status: String,
}

impl From<&Workshop> for WorkshopResponse {
    fn from(workshop: &Workshop) -> Self {
        Self {
            id: workshop.id().map(|id| id.to_string()).unwrap_or_default(),
            product_id: workshop.product_id().map(|p| p.to_string()),
            start: workshop.start(),
            end: workshop.end(),
            capacity: workshop.capacity(),
            attendees: workshop.attendees(),
            remaining: workshop.remaining(),
            bookings: workshop.booking_count(),
            status: workshop.status().to_string(),
        }
    }
}

// -- Blockouts --

/// POST /admin/blockouts
#[tracing::instrument(skip(state, req))]
pub async fn block<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BlockRequest>,
) -> Result<(StatusCode, Json<CalendarBlockout>), ApiError> {
    let end = req.end.unwrap_or(req.start);
    let blockout = state.admin.block_range(req.start, end, &req.reason).await?;
    Ok((StatusCode::CREATED, Json(blockout)))
}

/// DELETE /admin/blockouts/{date}: makes one day bookable again.
#[tracing::instrument(skip(state))]
pub async fn unblock<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(date): Path<String>,
) -> Result<Json<UnblockResponse>, ApiError> {
    let date = parse_date(&date)?;
    let blockouts_lifted = state.admin.unblock_date(date).await?;
    Ok(Json(UnblockResponse {
        date,
        blockouts_lifted,
    }))
}

/// GET /admin/blockouts
#[tracing::instrument(skip(state, query))]
pub async fn list_blockouts<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<BlockoutQuery>,
) -> Result<Json<BlockoutList>, ApiError> {
    let blockouts = state.admin.list_blockouts().await?;
    let blocked_dates = match (query.start, query.end) {
        (Some(start), Some(end)) => Some(state.availability.get_blocked_dates(start, end).await?),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "start and end must be given together".to_string(),
            ));
        }
    };
    Ok(Json(BlockoutList {
        blockouts,
        blocked_dates,
    }))
}

// -- Coupons --

/// POST /admin/coupons
#[tracing::instrument(skip(state, req), fields(code = %req.code))]
pub async fn create_coupon<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<CouponResponse>), ApiError> {
    let code = CouponCode::parse(&req.code).map_err(DomainError::from)?;
    let coupon = state
        .admin
        .create_coupon(CouponDefinition {
            code,
            discount: req.discount,
            minimum_amount: req.minimum_amount.unwrap_or(Money::zero()),
            usage_limit: req.usage_limit,
            expires_at: req.expires_at,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CouponResponse::from(&coupon))))
}

/// GET /admin/coupons/{code}
#[tracing::instrument(skip(state))]
pub async fn get_coupon<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<CouponResponse>, ApiError> {
    let coupon = state.admin.get_coupon(&code).await?;
    Ok(Json(CouponResponse::from(&coupon)))
}

/// POST /admin/coupons/{code}/deactivate
#[tracing::instrument(skip(state))]
pub async fn deactivate_coupon<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(code): Path<String>,
) -> Result<Json<CouponResponse>, ApiError> {
    let coupon = state.admin.deactivate_coupon(&code).await?;
    Ok(Json(CouponResponse::from(&coupon)))
}

// -- Workshops --

/// GET /admin/workshops/{id}
#[tracing::instrument(skip(state))]
pub async fn get_workshop<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<WorkshopResponse>, ApiError> {
    let workshop = state.admin.get_workshop(&WorkshopId::new(id)).await?;
    Ok(Json(WorkshopResponse::from(&workshop)))
}

/// PUT /admin/workshops/{id}/capacity
#[tracing::instrument(skip(state, req), fields(capacity = req.capacity))]
pub async fn set_capacity<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CapacityRequest>,
) -> Result<Json<WorkshopResponse>, ApiError> {
    let workshop = state
        .admin
        .set_workshop_capacity(&WorkshopId::new(id), req.capacity)
        .await?;
    Ok(Json(WorkshopResponse::from(&workshop)))
}

// -- Sales --

/// GET /admin/sales: catches the sales view up, then reports it.
#[tracing::instrument(skip(state))]
pub async fn sales<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<SalesSummary>, ApiError> {
    state.projection_processor.run_catch_up().await?;
    Ok(Json(state.sales.summary().await))
}
