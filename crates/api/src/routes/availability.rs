//! Availability endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::NaiveDate;
use domain::Slot;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct DateAvailability {
    pub date: NaiveDate,
    pub available: bool,
}

#[derive(Deserialize)]
pub struct SlotQuery {
    pub open_hour: Option<u32>,
    pub close_hour: Option<u32>,
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ApiError::BadRequest(format!("Invalid date {raw:?}: {e}")))
}

/// GET /availability/{date}: false when any blockout covers the date.
#[tracing::instrument(skip(state))]
pub async fn date<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(date): Path<String>,
) -> Result<Json<DateAvailability>, ApiError> {
    let date = parse_date(&date)?;
    let available = state
        .availability
        .is_date_available(date)
        .await?;
    Ok(Json(DateAvailability { date, available }))
}

/// GET /availability/{date}/slots: hourly slots, business hours by default.
#[tracing::instrument(skip(state, query))]
pub async fn slots<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(date): Path<String>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Vec<Slot>>, ApiError> {
    let date = parse_date(&date)?;
    let hours = state.availability.business_hours();
    let open = query.open_hour.unwrap_or(hours.open_hour);
    let close = query.close_hour.unwrap_or(hours.close_hour);
    if open >= close || close > 24 {
        return Err(ApiError::BadRequest(format!(
            "Invalid hour range {open}..{close}"
        )));
    }

    let slots = state
        .availability
        .get_hourly_slots(date, open, close)
        .await?;
    Ok(Json(slots))
}
