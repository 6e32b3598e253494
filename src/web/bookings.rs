//! Court booking handlers for signed-in members.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use ts_rs::TS;
use uuid::Uuid;

use crate::booking::pricing::Quote;
use crate::booking::reservations::{self, Reservation};
use crate::data::bookings;
use crate::data::models::{Booking, BookingStatus};
use crate::state::AppState;
use crate::web::auth::extractors::AuthUser;
use crate::web::checkout::{self, hold_duration};
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BookingRequest {
    pub slot_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct BookingResponse {
    #[serde(flatten)]
    pub reservation: Reservation,
    /// Present while the booking is held pending payment.
    pub checkout_url: Option<String>,
}

/// `POST /api/bookings/quote`
pub async fn quote_booking(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<BookingRequest>,
) -> Result<Json<Quote>, ApiError> {
    let quote = reservations::quote(&state.db_pool, user.id, &body.slot_ids, Utc::now()).await?;
    Ok(Json(quote))
}

/// `POST /api/bookings`
///
/// Paid bookings are held and sent to checkout. If checkout cannot be opened
/// the hold is released so the court is not blocked for nothing.
#[instrument(skip_all, fields(user_id = %user.id, slots = body.slot_ids.len()))]
pub async fn create_booking(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<BookingRequest>,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let reservation = reservations::reserve(
        &state.db_pool,
        user.id,
        &body.slot_ids,
        hold_duration(&state),
        now,
    )
    .await?;

    let checkout_url = if reservation.booking.status == BookingStatus::Pending {
        match checkout::booking_checkout(&state, &user, &reservation.booking).await {
            Ok(url) => Some(url),
            Err(e) => {
                reservations::cancel(&state.db_pool, user.id, false, reservation.booking.id, now)
                    .await?;
                return Err(e);
            }
        }
    } else {
        None
    };

    let response = BookingResponse {
        reservation,
        checkout_url,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// `GET /api/bookings`
pub async fn list_bookings(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = bookings::list_for_user(&state.db_pool, user.id)
        .await
        .map_err(|e| db_error("Booking list", e))?;
    Ok(Json(bookings))
}

/// `GET /api/bookings/{id}`
pub async fn get_booking(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, ApiError> {
    let booking = bookings::get(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Booking lookup", e))?
        .filter(|b| b.user_id == user.id || user.is_staff())
        .or_not_found("Booking", id)?;
    Ok(Json(booking))
}

/// `POST /api/bookings/{id}/cancel`
#[instrument(skip_all, fields(user_id = %user.id, booking_id = %id))]
pub async fn cancel_booking(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, ApiError> {
    let booking =
        reservations::cancel(&state.db_pool, user.id, user.is_staff(), id, Utc::now()).await?;
    Ok(Json(booking))
}
