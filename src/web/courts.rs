//! Public court listing and availability handlers.

use axum::extract::{Path, Query, State};
use axum::response::{Json, Response};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::booking::reservations::{self, CourtAvailability};
use crate::data::courts;
use crate::data::models::Court;
use crate::state::AppState;
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub date: Option<NaiveDate>,
}

/// `GET /api/courts`
pub async fn list_courts(State(state): State<AppState>) -> Result<Response, ApiError> {
    let courts = courts::list(&state.db_pool, false)
        .await
        .map_err(|e| db_error("Court list", e))?;
    Ok(with_cache_control(courts, cache::REFERENCE))
}

/// `GET /api/courts/{id}`
pub async fn get_court(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Court>, ApiError> {
    let court = courts::get(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Court lookup", e))?
        .filter(|c| c.is_active)
        .or_not_found("Court", id)?;
    Ok(Json(court))
}

/// `GET /api/courts/{id}/availability?date=YYYY-MM-DD`
///
/// Defaults to today in the facility time zone.
#[instrument(skip_all, fields(court_id = %id))]
pub async fn court_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let tz = state.config.facility_timezone;
    let date = params
        .date
        .unwrap_or_else(|| now.with_timezone(&tz).date_naive());
    let availability: CourtAvailability =
        reservations::availability(&state.db_pool, id, date, tz, now).await?;
    Ok(with_cache_control(availability, cache::LIVE))
}
