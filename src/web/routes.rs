//! Web API router construction and shared response utilities.

use axum::{
    Router,
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};

use std::time::Duration;

use axum::response::Json;

use crate::state::AppState;
use crate::web::middleware::rate_limit::RateLimitLayer;
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::middleware::security_headers::SecurityHeadersLayer;
use crate::web::{
    admin, auth, bookings, checkout, courts, memberships, pages, profile, registrations, sessions,
    status, webhook,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};

/// Cache-Control presets for public endpoints.
pub mod cache {
    /// Courts and membership tiers; changes only through admin edits.
    pub const REFERENCE: &str = "public, max-age=300, stale-while-revalidate=300";
    /// Availability and session seat counts.
    pub const LIVE: &str = "public, max-age=15";
    /// Admin endpoints are never cached.
    pub const ADMIN: &str = "private, no-store, must-revalidate";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/courts", get(courts::list_courts))
        .route("/courts/{id}", get(courts::get_court))
        .route("/courts/{id}/availability", get(courts::court_availability))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/memberships", get(memberships::list_memberships))
        .route("/stripe/webhook", post(webhook::stripe_webhook))
        .with_state(app_state.clone());

    let member_router = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route("/bookings/quote", post(bookings::quote_booking))
        .route(
            "/bookings",
            get(bookings::list_bookings).post(bookings::create_booking),
        )
        .route("/bookings/{id}", get(bookings::get_booking))
        .route("/bookings/{id}/cancel", post(bookings::cancel_booking))
        .route("/sessions/{id}/register", post(sessions::register))
        .route("/registrations", get(registrations::list_registrations))
        .route(
            "/registrations/{id}/cancel",
            post(registrations::cancel_registration),
        )
        .route(
            "/registrations/{id}/checkout",
            post(registrations::checkout_registration),
        )
        .route("/checkout/membership", post(checkout::membership_checkout))
        .route("/checkout/confirm", post(checkout::confirm_checkout))
        .route("/subscription", get(checkout::subscription_status))
        .route("/billing-portal", post(checkout::billing_portal))
        .with_state(app_state.clone());

    let admin_router = Router::new()
        .route("/admin/status", get(admin::admin_status))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{id}/role", put(admin::set_user_role))
        .route("/admin/bookings", get(admin::list_bookings))
        .route("/admin/courts", post(admin::courts::create_court))
        .route("/admin/courts/{id}", put(admin::courts::update_court))
        .route(
            "/admin/courts/{id}/slots/generate",
            post(admin::courts::generate_slots),
        )
        .route("/admin/slots/{id}", put(admin::courts::update_slot))
        .route("/admin/sessions", post(admin::sessions::create_session))
        .route("/admin/sessions/{id}", put(admin::sessions::update_session))
        .route(
            "/admin/sessions/{id}/cancel",
            post(admin::sessions::cancel_session),
        )
        .route(
            "/admin/sessions/{id}/registrations",
            get(admin::sessions::session_roster),
        )
        .layer(axum::middleware::map_response(
            |mut resp: Response| async move {
                resp.headers_mut().insert(
                    axum::http::header::CACHE_CONTROL,
                    HeaderValue::from_static(cache::ADMIN),
                );
                resp
            },
        ))
        .with_state(app_state.clone());

    let public_origin = app_state.config.public_origin.clone();
    let rate_limit = app_state.rate_limit.clone();

    let router = Router::new()
        .route("/", get(pages::home))
        .route("/about", get(pages::about))
        .route("/programs", get(pages::programs))
        .route("/pricing", get(pages::pricing))
        .route("/contact", get(pages::contact))
        .route("/checkout/success", get(pages::checkout_success))
        .route("/checkout/cancelled", get(pages::checkout_cancelled))
        .route("/robots.txt", get(robots_txt))
        .nest("/api", api_router)
        .nest("/api", member_router)
        .nest("/api", admin_router)
        .fallback(pages::fallback)
        .with_state(app_state);

    router.layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        RequestIdLayer,
        // Security headers on every response (HSTS only behind https origins).
        SecurityHeadersLayer::new(&public_origin),
        CompressionLayer::new()
            .zstd(true)
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        // Inside compression so rejections share the router's body type.
        RateLimitLayer::new(rate_limit),
        TimeoutLayer::new(Duration::from_secs(30)),
    ))
}

/// `GET /robots.txt`
///
/// Blocks crawlers from API and checkout paths.
async fn robots_txt(State(state): State<AppState>) -> Response {
    let body = format!(
        "User-agent: *\n\
         Disallow: /api/\n\
         Disallow: /checkout/\n\
         \n\
         Host: {}\n",
        state.config.public_origin.trim_end_matches('/')
    );
    let mut resp = body.into_response();
    resp.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    resp
}
