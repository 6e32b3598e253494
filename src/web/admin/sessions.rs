//! Group session administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};
use ts_rs::TS;
use uuid::Uuid;

use crate::booking::registrations;
use crate::data::models::{Session, SessionRegistration};
use crate::data::registrations::{self as registration_rows, RosterEntry};
use crate::data::sessions::{self, NewSession, SessionUpdate};
use crate::state::AppState;
use crate::web::auth::extractors::{AdminUser, StaffUser};
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};

/// Largest session a single entry may describe.
const MAX_CAPACITY: i32 = 500;

fn validate_capacity(capacity: i32) -> Result<(), ApiError> {
    if !(1..=MAX_CAPACITY).contains(&capacity) {
        return Err(ApiError::bad_request(format!(
            "Capacity must be between 1 and {MAX_CAPACITY}"
        )));
    }
    Ok(())
}

fn validate_price(price_cents: i32) -> Result<(), ApiError> {
    if price_cents < 0 {
        return Err(ApiError::bad_request("Price cannot be negative"));
    }
    Ok(())
}

fn validate_new(new: &NewSession) -> Result<(), ApiError> {
    if new.title.trim().is_empty() {
        return Err(ApiError::bad_request("Session title is required"));
    }
    validate_capacity(new.capacity)?;
    validate_price(new.price_cents)
}

fn validate_update(update: &SessionUpdate) -> Result<(), ApiError> {
    if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(ApiError::bad_request("Session title cannot be blank"));
    }
    if let Some(capacity) = update.capacity {
        validate_capacity(capacity)?;
    }
    if let Some(price) = update.price_cents {
        validate_price(price)?;
    }
    Ok(())
}

/// `POST /api/admin/sessions`
#[instrument(skip_all)]
pub async fn create_session(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Json(body): Json<NewSession>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    validate_new(&body)?;
    let session = registrations::create_session(&state.db_pool, &body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionUpdateResponse {
    pub session: Session,
    /// Waitlisted members moved into seats by a capacity increase.
    pub promoted: Vec<SessionRegistration>,
}

/// `PUT /api/admin/sessions/{id}`
///
/// Lowering capacity below current seats does not evict anyone; it only
/// stops new seats from being granted.
#[instrument(skip_all, fields(session_id = %id))]
pub async fn update_session(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SessionUpdate>,
) -> Result<Json<SessionUpdateResponse>, ApiError> {
    validate_update(&body)?;
    let (session, promoted) = registrations::update_session(
        &state.db_pool,
        id,
        &body,
        state.config.facility_timezone,
        Utc::now(),
    )
    .await?;
    info!(capacity = session.capacity, promoted = promoted.len(), "Session updated");
    Ok(Json(SessionUpdateResponse { session, promoted }))
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionCancelResponse {
    #[ts(type = "number")]
    pub cancelled_registrations: u64,
}

/// `POST /api/admin/sessions/{id}/cancel`
#[instrument(skip_all, fields(session_id = %id))]
pub async fn cancel_session(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionCancelResponse>, ApiError> {
    let cancelled_registrations = registrations::cancel_session(&state.db_pool, id).await?;
    Ok(Json(SessionCancelResponse {
        cancelled_registrations,
    }))
}

/// `GET /api/admin/sessions/{id}/registrations`
pub async fn session_roster(
    StaffUser(_user): StaffUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RosterEntry>>, ApiError> {
    sessions::get_with_counts(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Session lookup", e))?
        .or_not_found("Session", id)?;
    let roster = registration_rows::roster(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Roster", e))?;
    Ok(Json(roster))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::SessionKind;

    fn new_session() -> NewSession {
        let start = Utc::now() + chrono::Duration::days(1);
        NewSession {
            title: "Beginner clinic".into(),
            description: None,
            kind: SessionKind::Clinic,
            skill_level: Some("2.5".into()),
            instructor: None,
            court_id: None,
            start_time: start,
            end_time: start + chrono::Duration::hours(1),
            capacity: 8,
            price_cents: 2500,
        }
    }

    #[test]
    fn accepts_reasonable_sessions() {
        assert!(validate_new(&new_session()).is_ok());
    }

    #[test]
    fn rejects_blank_titles_and_bad_capacity() {
        let mut s = new_session();
        s.title = "  ".into();
        assert!(validate_new(&s).is_err());

        let mut s = new_session();
        s.capacity = 0;
        assert!(validate_new(&s).is_err());

        let mut s = new_session();
        s.price_cents = -1;
        assert!(validate_new(&s).is_err());
    }

    #[test]
    fn update_checks_only_present_fields() {
        assert!(validate_update(&SessionUpdate::default()).is_ok());
        let update = SessionUpdate {
            capacity: Some(MAX_CAPACITY + 1),
            ..Default::default()
        };
        assert!(validate_update(&update).is_err());
    }
}
