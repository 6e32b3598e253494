//! Handlers for a member's own session registrations.

use axum::extract::{Path, State};
use axum::response::Json;
use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::booking::registrations::{self, Cancellation};
use crate::data::models::RegistrationStatus;
use crate::data::registrations::{self as registration_rows, RegistrationWithSession};
use crate::state::AppState;
use crate::web::auth::extractors::AuthUser;
use crate::web::checkout::{self, RedirectResponse};
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};

/// `GET /api/registrations`
pub async fn list_registrations(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<RegistrationWithSession>>, ApiError> {
    let regs = registration_rows::list_for_user(&state.db_pool, user.id)
        .await
        .map_err(|e| db_error("Registration list", e))?;
    Ok(Json(regs))
}

/// `POST /api/registrations/{id}/cancel`
#[instrument(skip_all, fields(user_id = %user.id, registration_id = %id))]
pub async fn cancel_registration(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Cancellation>, ApiError> {
    let cancellation = registrations::cancel(
        &state.db_pool,
        user.id,
        user.is_staff(),
        id,
        state.config.facility_timezone,
        Utc::now(),
    )
    .await?;
    Ok(Json(cancellation))
}

/// `POST /api/registrations/{id}/checkout`
///
/// Pays for a held seat or for a seat granted by waitlist promotion.
#[instrument(skip_all, fields(user_id = %user.id, registration_id = %id))]
pub async fn checkout_registration(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RedirectResponse>, ApiError> {
    let registration = registration_rows::get(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Registration lookup", e))?
        .filter(|r| r.user_id == user.id)
        .or_not_found("Registration", id)?;
    registrations::payable(&registration)?;
    if registration.status == RegistrationStatus::Pending
        && registration.expires_at.is_some_and(|at| at <= Utc::now())
    {
        return Err(ApiError::conflict("The hold on this seat has expired"));
    }

    let url = checkout::registration_checkout(&state, &user, &registration).await?;
    Ok(Json(RedirectResponse { url }))
}
