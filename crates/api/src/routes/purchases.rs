//! Purchase endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDateTime, Utc};
use common::AggregateId;
use event_store::EventStore;
use saga::{Attendee, PurchaseRequest, PurchaseResult};
use serde::Serialize;

use crate::AppState;
use crate::error::{ApiError, status_for};

#[derive(Serialize)]
pub struct PurchaseResponse {
    #[serde(flatten)]
    pub result: PurchaseResult,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub attendees: Vec<Attendee>,
    pub coupon_code: Option<String>,
    pub compensated_steps: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

pub(crate) fn parse_id(raw: &str) -> Result<AggregateId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid purchase id {raw:?}: {e}")))
}

/// POST /purchases: run a purchase to completion or compensated failure.
///
/// A completed purchase answers 201; a failed one answers with the status
/// of its failure class and the same body.
#[tracing::instrument(skip(state, req), fields(product = %req.product_id))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResult>), ApiError> {
    let result = state.saga.process_purchase(req).await?;
    let status = match result.error_kind {
        _ if result.is_completed() => StatusCode::CREATED,
        Some(kind) => status_for(kind),
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(result)))
}

/// GET /purchases/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let purchase = state.saga.get_purchase(parse_id(&id)?).await?;
    Ok(Json(PurchaseResponse {
        result: PurchaseResult::from(&purchase),
        product_id: purchase.product_id().map(|p| p.to_string()),
        product_name: purchase.product_name().map(str::to_string),
        start: purchase.start(),
        end: purchase.end(),
        attendees: purchase.attendees().to_vec(),
        coupon_code: purchase.coupon_code().map(str::to_string),
        compensated_steps: purchase.compensated_steps().to_vec(),
        started_at: purchase.started_at(),
        completed_at: purchase.completed_at(),
        closed_at: purchase.closed_at(),
    }))
}

/// POST /purchases/{id}/cancel: refund and cancel a completed purchase.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PurchaseResult>, ApiError> {
    let result = state.saga.cancel_purchase(parse_id(&id)?).await?;
    Ok(Json(result))
}
