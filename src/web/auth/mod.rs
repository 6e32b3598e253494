//! Email/password authentication with cookie sessions.

pub mod extractors;
pub mod password;
pub mod session;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use ts_rs::TS;

use crate::booking::pricing;
use crate::data::accounts::{self, CreateAccountError};
use crate::data::models::{AppRole, MembershipTier, Profile};
use crate::data::{profiles, user_sessions};
use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode, OptionNotFoundExt, db_error};
use crate::web::middleware::client_ip::ClientIp;
use extractors::{AuthUser, session_token};
use session::{SessionUser, generate_token};

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MeResponse {
    pub profile: Profile,
    pub roles: Vec<AppRole>,
    /// Tier currently granting discounts (paid tier with a live subscription).
    pub effective_tier: MembershipTier,
}

fn session_cookie(state: &AppState, token: &str) -> Cookie<'static> {
    let max_age = cookie::time::Duration::seconds(
        i64::try_from(state.config.session_ttl.as_secs()).unwrap_or(i64::MAX),
    );
    Cookie::build((SESSION_COOKIE, token.to_owned()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.public_origin.starts_with("https://"))
        .max_age(max_age)
        .build()
}

fn with_cookie(mut response: Response, cookie: &Cookie<'_>) -> Response {
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

async fn me_for(state: &AppState, user: &SessionUser) -> Result<MeResponse, ApiError> {
    let profile = profiles::get(&state.db_pool, user.id)
        .await
        .map_err(|e| db_error("Profile lookup", e))?
        .or_not_found("Profile", user.id)?;
    Ok(MeResponse {
        effective_tier: pricing::effective_tier(&profile, Utc::now()),
        profile,
        roles: user.roles.clone(),
    })
}

/// Start a session for `user` and return the `Set-Cookie`-carrying response.
async fn start_session(
    state: &AppState,
    user: SessionUser,
    status: StatusCode,
) -> Result<Response, ApiError> {
    let token = generate_token();
    let ttl = chrono::Duration::from_std(state.config.session_ttl)
        .unwrap_or_else(|_| chrono::Duration::days(30));
    let expires_at = Utc::now() + ttl;
    user_sessions::create(&state.db_pool, &token, user.id, expires_at)
        .await
        .map_err(|e| db_error("Session create", e))?;
    state.session_cache.insert(&token, user.clone(), expires_at);

    let me = me_for(state, &user).await?;
    let response = (status, Json(me)).into_response();
    Ok(with_cookie(response, &session_cookie(state, &token)))
}

/// `POST /api/auth/signup`
#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<SignupRequest>,
) -> Result<Response, ApiError> {
    let email = password::normalize_email(&body.email)
        .ok_or_else(|| ApiError::bad_request("Enter a valid email address"))?;
    password::validate_password(&body.password).map_err(ApiError::bad_request)?;
    let full_name = body
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let plain = body.password;
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| db_error("Password hashing task", e.into()))?
        .map_err(|e| db_error("Password hashing", anyhow::anyhow!(e.to_string())))?;

    let account = match accounts::create(&state.db_pool, &email, &hash, full_name).await {
        Ok(account) => account,
        Err(CreateAccountError::EmailTaken) => {
            return Err(ApiError::conflict("An account with this email already exists"));
        }
        Err(CreateAccountError::Database(e)) => return Err(db_error("Account create", e.into())),
    };
    info!(user_id = %account.id, client_ip = %ip, "Account created");

    let user = SessionUser {
        id: account.id,
        roles: vec![AppRole::Member],
    };
    start_session(&state, user, StatusCode::CREATED).await
}

/// `POST /api/auth/login`
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let invalid = || ApiError::new(ApiErrorCode::Unauthorized, "Invalid email or password");

    let account = accounts::find_by_email(&state.db_pool, body.email.trim())
        .await
        .map_err(|e| db_error("Account lookup", e))?;
    let Some(account) = account else {
        let plain = body.password;
        tokio::task::spawn_blocking(move || password::verify_unknown_account(&plain))
            .await
            .map_err(|e| db_error("Password verify task", e.into()))?;
        warn!(client_ip = %ip, "Login for unknown email");
        return Err(invalid());
    };

    let hash = account.password_hash.clone();
    let plain = body.password;
    let valid = tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| db_error("Password verify task", e.into()))?;
    if !valid {
        warn!(user_id = %account.id, client_ip = %ip, "Login with wrong password");
        return Err(invalid());
    }

    let roles = crate::data::roles::for_user(&state.db_pool, account.id)
        .await
        .map_err(|e| db_error("Role lookup", e))?;
    info!(user_id = %account.id, "Signed in");
    start_session(
        &state,
        SessionUser {
            id: account.id,
            roles,
        },
        StatusCode::OK,
    )
    .await
}

/// `POST /api/auth/logout`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if let Some(token) = session_token(&headers) {
        state.session_cache.evict(&token);
        user_sessions::delete(&state.db_pool, &token)
            .await
            .map_err(|e| db_error("Session delete", e))?;
    }
    let mut expired = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    expired.make_removal();
    Ok(with_cookie(StatusCode::NO_CONTENT.into_response(), &expired))
}

/// `GET /api/auth/me`
pub async fn me(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<MeResponse>, ApiError> {
    Ok(Json(me_for(&state, &user).await?))
}
