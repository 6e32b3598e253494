//! Request extractors for signed-in users and role checks.

use axum::extract::FromRequestParts;
use http::request::Parts;

use super::SESSION_COOKIE;
use super::session::SessionUser;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

/// Read the session token from the `Cookie` header.
pub fn session_token(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(cookie::Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == SESSION_COOKIE)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
}

/// Any signed-in user.
pub struct AuthUser(pub SessionUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        if let Some(user) = parts.extensions.get::<SessionUser>() {
            return Ok(AuthUser(user.clone()));
        }
        let token = session_token(&parts.headers).ok_or_else(ApiError::unauthorized)?;
        let user = state
            .session_cache
            .resolve(&token)
            .await
            .map_err(|e| db_error("Session lookup", e))?
            .ok_or_else(ApiError::unauthorized)?;
        parts.extensions.insert(user.clone());
        Ok(AuthUser(user))
    }
}

/// A user with the `staff` or `admin` role.
pub struct StaffUser(pub SessionUser);

impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff() {
            return Err(ApiError::forbidden());
        }
        Ok(StaffUser(user))
    }
}

/// A user with the `admin` role.
pub struct AdminUser(pub SessionUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden());
        }
        Ok(AdminUser(user))
    }
}
