//! Court and time-slot administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};
use ts_rs::TS;
use uuid::Uuid;

use crate::booking::interval::Interval;
use crate::booking::week;
use crate::data::courts::{self, CourtUpdate, NewCourt};
use crate::data::models::{Court, TimeSlot};
use crate::data::time_slots;
use crate::state::AppState;
use crate::web::auth::extractors::AdminUser;
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};

/// Longest date range one generate request may cover.
pub const MAX_GENERATE_DAYS: i64 = 62;

fn validate_rate(rate: i32) -> Result<(), ApiError> {
    if rate < 0 {
        return Err(ApiError::bad_request("Prices cannot be negative"));
    }
    Ok(())
}

/// `POST /api/admin/courts`
#[instrument(skip_all)]
pub async fn create_court(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(body): Json<NewCourt>,
) -> Result<(StatusCode, Json<Court>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("Court name is required"));
    }
    validate_rate(body.hourly_rate_cents)?;
    let court = courts::create(&state.db_pool, &body)
        .await
        .map_err(|e| db_error("Court create", e))?;
    info!(court_id = %court.id, name = %court.name, "Court created");
    Ok((StatusCode::CREATED, Json(court)))
}

/// `PUT /api/admin/courts/{id}`
#[instrument(skip_all, fields(court_id = %id))]
pub async fn update_court(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CourtUpdate>,
) -> Result<Json<Court>, ApiError> {
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::bad_request("Court name cannot be blank"));
    }
    if let Some(rate) = body.hourly_rate_cents {
        validate_rate(rate)?;
    }
    let court = courts::update(&state.db_pool, id, &body)
        .await
        .map_err(|e| db_error("Court update", e))?
        .or_not_found("Court", id)?;
    info!(is_active = court.is_active, "Court updated");
    Ok(Json(court))
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GenerateSlotsRequest {
    pub from: NaiveDate,
    /// Inclusive.
    pub to: NaiveDate,
    /// Defaults to the facility opening hour.
    pub opening_hour: Option<u32>,
    /// Defaults to the facility closing hour.
    pub closing_hour: Option<u32>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GenerateSlotsResponse {
    #[ts(type = "number")]
    pub created: u64,
    #[ts(type = "number")]
    pub skipped: u64,
}

/// Hourly intervals for every day in `[from, to]`, dropping those that
/// already started.
pub fn planned_slots(
    request: &GenerateSlotsRequest,
    default_hours: (u32, u32),
    tz: chrono_tz::Tz,
    now: chrono::DateTime<Utc>,
) -> Result<Vec<Interval>, ApiError> {
    let opening = request.opening_hour.unwrap_or(default_hours.0);
    let closing = request.closing_hour.unwrap_or(default_hours.1);
    if closing > 24 || opening >= closing {
        return Err(ApiError::bad_request(
            "openingHour must be before closingHour (0-24)",
        ));
    }
    let days = (request.to - request.from).num_days();
    if days < 0 {
        return Err(ApiError::bad_request("`to` must not be before `from`"));
    }
    if days >= MAX_GENERATE_DAYS {
        return Err(ApiError::bad_request(format!(
            "At most {MAX_GENERATE_DAYS} days can be generated at once"
        )));
    }

    Ok(request
        .from
        .iter_days()
        .take_while(|d| *d <= request.to)
        .flat_map(|date| week::hourly_slots(date, opening, closing, tz))
        .filter(|slot| slot.start > now)
        .collect())
}

/// `POST /api/admin/courts/{id}/slots/generate`
///
/// Existing slots (same court and start) are left untouched.
#[instrument(skip_all, fields(court_id = %id))]
pub async fn generate_slots(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateSlotsRequest>,
) -> Result<Json<GenerateSlotsResponse>, ApiError> {
    courts::get(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Court lookup", e))?
        .or_not_found("Court", id)?;

    let config = &state.config;
    let planned = planned_slots(
        &body,
        (config.opening_hour, config.closing_hour),
        config.facility_timezone,
        Utc::now(),
    )?;
    let created = time_slots::create_many(&state.db_pool, id, &planned)
        .await
        .map_err(|e| db_error("Slot generation", e))?;
    let skipped = planned.len() as u64 - created;

    info!(from = %body.from, to = %body.to, created, skipped, "Generated time slots");
    Ok(Json(GenerateSlotsResponse { created, skipped }))
}

/// Distinguish an absent field from an explicit `null`.
fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<i32>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i32>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SlotUpdate {
    pub is_available: Option<bool>,
    /// `null` clears the override; absent leaves it unchanged.
    #[serde(default, deserialize_with = "explicit_null")]
    #[ts(optional, type = "number | null")]
    pub price_cents: Option<Option<i32>>,
}

/// `PUT /api/admin/slots/{id}`: block/unblock a slot or override its price.
#[instrument(skip_all, fields(slot_id = %id))]
pub async fn update_slot(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SlotUpdate>,
) -> Result<Json<TimeSlot>, ApiError> {
    if let Some(Some(price)) = body.price_cents {
        validate_rate(price)?;
    }
    let slot = time_slots::update(&state.db_pool, id, body.is_available, body.price_cents)
        .await
        .map_err(|e| db_error("Slot update", e))?
        .or_not_found("Time slot", id)?;
    info!(is_available = slot.is_available, price_cents = ?slot.price_cents, "Slot updated");
    Ok(Json(slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;

    fn request(from: &str, to: &str) -> GenerateSlotsRequest {
        GenerateSlotsRequest {
            from: from.parse().unwrap(),
            to: to.parse().unwrap(),
            opening_hour: None,
            closing_hour: None,
        }
    }

    fn long_ago() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn plans_hourly_slots_for_each_day() {
        let slots = planned_slots(&request("2026-05-04", "2026-05-06"), (6, 22), Chicago, long_ago())
            .unwrap();
        assert_eq!(slots.len(), 3 * 16);
        assert!(slots.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn drops_slots_already_started() {
        // 2026-05-04 12:00 CDT = 17:00 UTC; the 06:00 through 12:00 slots have started.
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 17, 0, 0).unwrap();
        let slots = planned_slots(&request("2026-05-04", "2026-05-04"), (6, 22), Chicago, now).unwrap();
        assert_eq!(slots.len(), 9);
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(planned_slots(&request("2026-05-06", "2026-05-04"), (6, 22), Chicago, long_ago()).is_err());
        assert!(planned_slots(&request("2026-01-01", "2026-12-31"), (6, 22), Chicago, long_ago()).is_err());
        let mut req = request("2026-05-04", "2026-05-04");
        req.opening_hour = Some(22);
        assert!(planned_slots(&req, (6, 22), Chicago, long_ago()).is_err());
    }

    #[test]
    fn slot_update_distinguishes_null_from_absent() {
        let absent: SlotUpdate = serde_json::from_str(r#"{"isAvailable": false}"#).unwrap();
        assert_eq!(absent.price_cents, None);
        let cleared: SlotUpdate = serde_json::from_str(r#"{"priceCents": null}"#).unwrap();
        assert_eq!(cleared.price_cents, Some(None));
        let set: SlotUpdate = serde_json::from_str(r#"{"priceCents": 2500}"#).unwrap();
        assert_eq!(set.price_cents, Some(Some(2500)));
    }
}
