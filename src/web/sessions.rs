//! Group session listing and registration handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use ts_rs::TS;
use uuid::Uuid;

use crate::booking::registrations::{self, RegistrationOutcome};
use crate::booking::waitlist;
use crate::data::models::SessionKind;
use crate::data::sessions::{self, SessionFilter, SessionWithCounts};
use crate::state::AppState;
use crate::web::auth::extractors::AuthUser;
use crate::web::checkout::{self, hold_duration};
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Deserialize)]
pub struct SessionListParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub kind: Option<SessionKind>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionWithCounts,
    #[ts(type = "number")]
    pub seats_left: i64,
}

impl From<SessionWithCounts> for SessionDetail {
    fn from(session: SessionWithCounts) -> Self {
        Self {
            seats_left: waitlist::seats_left(session.occupied, session.session.capacity),
            session,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegisterResponse {
    #[serde(flatten)]
    pub outcome: RegistrationOutcome,
    /// Present when the seat is held pending payment.
    pub checkout_url: Option<String>,
}

/// `GET /api/sessions?from=&to=&kind=`
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(params): Query<SessionListParams>,
) -> Result<Response, ApiError> {
    if let (Some(from), Some(to)) = (params.from, params.to)
        && to <= from
    {
        return Err(ApiError::bad_request("`to` must be after `from`"));
    }
    let filter = SessionFilter {
        from: params.from,
        to: params.to,
        kind: params.kind,
        include_cancelled: false,
    };
    let sessions: Vec<SessionDetail> = sessions::list(&state.db_pool, &filter)
        .await
        .map_err(|e| db_error("Session list", e))?
        .into_iter()
        .map(SessionDetail::from)
        .collect();
    Ok(with_cache_control(sessions, cache::LIVE))
}

/// `GET /api/sessions/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetail>, ApiError> {
    let session = sessions::get_with_counts(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Session lookup", e))?
        .or_not_found("Session", id)?;
    Ok(Json(session.into()))
}

/// `POST /api/sessions/{id}/register`
///
/// Takes a seat or joins the waitlist. A paid seat is held and a checkout
/// session is opened right away; if that fails (or payments are not
/// configured) the hold is released.
#[instrument(skip_all, fields(session_id = %id, user_id = %user.id))]
pub async fn register(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let tz = state.config.facility_timezone;
    let outcome = registrations::register(
        &state.db_pool,
        user.id,
        id,
        hold_duration(&state),
        tz,
        now,
    )
    .await?;

    let checkout_url = if registrations::payable(&outcome.registration).is_ok() {
        match checkout::registration_checkout(&state, &user, &outcome.registration).await {
            Ok(url) => Some(url),
            Err(e) => {
                let id = outcome.registration.id;
                registrations::cancel(&state.db_pool, user.id, false, id, tz, now).await?;
                return Err(e);
            }
        }
    } else {
        None
    };

    info!(
        registration_id = %outcome.registration.id,
        status = ?outcome.registration.status,
        waitlist_rank = ?outcome.waitlist_rank,
        "Session registration"
    );
    let response = RegisterResponse {
        outcome,
        checkout_url,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::Session;

    fn with_counts(capacity: i32, occupied: i64) -> SessionWithCounts {
        let start = Utc::now();
        SessionWithCounts {
            session: Session {
                id: Uuid::new_v4(),
                title: "Open play".into(),
                description: None,
                kind: SessionKind::OpenPlay,
                skill_level: None,
                instructor: None,
                court_id: None,
                start_time: start,
                end_time: start + chrono::Duration::hours(2),
                capacity,
                price_cents: 1500,
                is_cancelled: false,
                created_at: start,
            },
            occupied,
            waitlisted: 2,
        }
    }

    #[test]
    fn detail_reports_seats_left() {
        assert_eq!(SessionDetail::from(with_counts(8, 5)).seats_left, 3);
        assert_eq!(SessionDetail::from(with_counts(8, 8)).seats_left, 0);
    }

    #[test]
    fn detail_serializes_flat() {
        let json = serde_json::to_value(SessionDetail::from(with_counts(4, 1))).unwrap();
        assert_eq!(json["title"], "Open play");
        assert_eq!(json["occupied"], 1);
        assert_eq!(json["waitlisted"], 2);
        assert_eq!(json["seatsLeft"], 3);
    }
}
