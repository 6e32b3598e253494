//! JSON API error type shared by all handlers.

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{error, warn};
use ts_rs::TS;

use crate::booking::BookingError;
use crate::stripe::StripeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ApiErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    /// The requested court time or seat is no longer free.
    Unavailable,
    NothingToPay,
    PaymentsUnavailable,
    PaymentProviderError,
    InvalidSignature,
    RateLimited,
    InternalError,
}

impl ApiErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            ApiErrorCode::BadRequest | ApiErrorCode::InvalidSignature => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::Conflict | ApiErrorCode::Unavailable | ApiErrorCode::NothingToPay => {
                StatusCode::CONFLICT
            }
            ApiErrorCode::PaymentsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::PaymentProviderError => StatusCode::BAD_GATEWAY,
            ApiErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[ts(type = "unknown")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::BadRequest, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ApiErrorCode::Unauthorized, "Sign in required")
    }

    pub fn forbidden() -> Self {
        Self::new(ApiErrorCode::Forbidden, "Insufficient permissions")
    }

    pub fn not_found(resource: &str, id: impl Display) -> Self {
        Self::new(ApiErrorCode::NotFound, format!("{resource} {id} not found"))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Conflict, message)
    }

    pub fn payments_unavailable() -> Self {
        Self::new(
            ApiErrorCode::PaymentsUnavailable,
            "Online payments are not configured",
        )
    }

    pub fn internal_error() -> Self {
        Self::new(ApiErrorCode::InternalError, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

/// Log a database failure and hide its details from the client.
pub fn db_error(context: &str, e: anyhow::Error) -> ApiError {
    error!(error = ?e, "{context} failed");
    ApiError::internal_error()
}

pub trait OptionNotFoundExt<T> {
    fn or_not_found(self, resource: &str, id: impl Display) -> Result<T, ApiError>;
}

impl<T> OptionNotFoundExt<T> for Option<T> {
    fn or_not_found(self, resource: &str, id: impl Display) -> Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(resource, id))
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        use BookingError as E;
        let code = match &e {
            E::InvalidInterval
            | E::NoSlots
            | E::TooManySlots { .. }
            | E::MixedCourts
            | E::NotContiguous
            | E::InPast => ApiErrorCode::BadRequest,
            E::SlotNotFound(_)
            | E::CourtNotFound
            | E::BookingNotFound
            | E::SessionNotFound
            | E::RegistrationNotFound => ApiErrorCode::NotFound,
            E::SlotBlocked(_) | E::SlotTaken { .. } | E::CourtInactive => ApiErrorCode::Unavailable,
            E::SessionCancelled
            | E::SessionStarted
            | E::AlreadyRegistered
            | E::NotCancellable(_) => ApiErrorCode::Conflict,
            E::NothingToPay => ApiErrorCode::NothingToPay,
            E::Database(inner) => {
                error!(error = ?inner, "Database error in booking flow");
                return ApiError::internal_error();
            }
            E::Internal(inner) => {
                error!(error = ?inner, "Booking flow failed");
                return ApiError::internal_error();
            }
        };
        let api = ApiError::new(code, e.to_string());
        match e {
            E::SlotTaken { start } => api.with_details(serde_json::json!({ "conflictStart": start })),
            E::SlotNotFound(id) | E::SlotBlocked(id) => {
                api.with_details(serde_json::json!({ "slotId": id }))
            }
            _ => api,
        }
    }
}

impl From<StripeError> for ApiError {
    fn from(e: StripeError) -> Self {
        warn!(error = %e, "Payment provider call failed");
        ApiError::new(
            ApiErrorCode::PaymentProviderError,
            "Payment provider is unavailable, try again shortly",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn booking_errors_map_to_statuses() {
        let cases = [
            (BookingError::NotContiguous, StatusCode::BAD_REQUEST),
            (BookingError::CourtNotFound, StatusCode::NOT_FOUND),
            (
                BookingError::SlotBlocked(Uuid::nil()),
                StatusCode::CONFLICT,
            ),
            (BookingError::AlreadyRegistered, StatusCode::CONFLICT),
            (
                BookingError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).code.status(), status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let api = ApiError::from(BookingError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(api.code, ApiErrorCode::InternalError);
        assert_eq!(api.message, "Internal server error");
    }

    #[test]
    fn slot_conflicts_carry_details() {
        let start = chrono::Utc::now();
        let api = ApiError::from(BookingError::SlotTaken { start });
        assert_eq!(api.code, ApiErrorCode::Unavailable);
        let details = api.details.unwrap();
        assert_eq!(details["conflictStart"], serde_json::json!(start));

        let api = ApiError::from(BookingError::SlotBlocked(Uuid::nil()));
        assert_eq!(api.details.unwrap()["slotId"], Uuid::nil().to_string());
    }

    #[test]
    fn serializes_screaming_code() {
        let body = serde_json::to_value(ApiError::not_found("Court", 7)).unwrap();
        assert_eq!(body["code"], "NOT_FOUND");
        assert_eq!(body["message"], "Court 7 not found");
        assert!(body["details"].is_null());
    }
}
