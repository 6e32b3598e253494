//! Router-level tests that need no database.
//!
//! The app state points at a Postgres address nobody listens on, so these
//! cover routing, auth rejections, webhook verification and static pages.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use helpers::offline_state;
use http_body_util::BodyExt;
use rally::stripe::webhook;
use rally::web::create_router;
use serde_json::Value;
use tower::ServiceExt;

async fn send(state: rally::state::AppState, request: Request<Body>) -> Response {
    create_router(state)
        .oneshot(request)
        .await
        .expect("router is infallible")
}

async fn get(path: &str) -> Response {
    send(
        offline_state(&[]),
        Request::get(path).body(Body::empty()).unwrap(),
    )
    .await
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}

#[tokio::test]
async fn health_reports_unavailable_database() {
    let response = get("/api/health").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "unhealthy");
}

#[tokio::test]
async fn status_reports_version() {
    let response = get("/api/status").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["services"].as_object().unwrap().is_empty());
}

#[tokio::test]
async fn protected_routes_require_session() {
    for (method, path) in [
        ("GET", "/api/auth/me"),
        ("GET", "/api/profile"),
        ("GET", "/api/bookings"),
        ("POST", "/api/bookings"),
        ("GET", "/api/registrations"),
        ("POST", "/api/checkout/membership"),
        ("GET", "/api/subscription"),
        ("POST", "/api/billing-portal"),
        ("GET", "/api/admin/status"),
        ("POST", "/api/admin/courts"),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = send(offline_state(&[]), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {path}");
        assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn admin_responses_are_never_cached() {
    let response = get("/api/admin/users").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "private, no-store, must-revalidate"
    );
}

#[tokio::test]
async fn memberships_list_every_tier() {
    let response = get("/api/memberships").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let tiers = body.as_array().unwrap();
    assert_eq!(tiers.len(), 4);
    assert!(tiers.iter().all(|t| t["purchasable"] == false));
    let elite = tiers.iter().find(|t| t["tier"] == "elite").unwrap();
    assert_eq!(elite["weeklyFreeSessions"], 3);
}

#[tokio::test]
async fn webhook_without_secret_is_unavailable() {
    let request = Request::post("/api/stripe/webhook")
        .body(Body::from("{}"))
        .unwrap();
    let response = send(offline_state(&[]), request).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn webhook_rejects_bad_signatures() {
    let state = || offline_state(&[("stripe_webhook_secret", "whsec_test")]);
    let payload = br#"{"id":"evt_1","type":"customer.subscription.updated","data":{"object":{}}}"#;

    let unsigned = Request::post("/api/stripe/webhook")
        .body(Body::from(payload.to_vec()))
        .unwrap();
    let response = send(state(), unsigned).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_SIGNATURE");

    let now = chrono::Utc::now().timestamp();
    let wrong_secret = Request::post("/api/stripe/webhook")
        .header(
            webhook_header(),
            webhook::sign(payload, "whsec_other", now),
        )
        .body(Body::from(payload.to_vec()))
        .unwrap();
    let response = send(state(), wrong_secret).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = Request::post("/api/stripe/webhook")
        .header(webhook_header(), webhook::sign(payload, "whsec_test", now - 3600))
        .body(Body::from(payload.to_vec()))
        .unwrap();
    let response = send(state(), stale).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_rejects_malformed_event_after_verification() {
    let payload = br#"{"not":"an event"}"#;
    let request = Request::post("/api/stripe/webhook")
        .header(
            webhook_header(),
            webhook::sign(payload, "whsec_test", chrono::Utc::now().timestamp()),
        )
        .body(Body::from(payload.to_vec()))
        .unwrap();
    let response = send(
        offline_state(&[("stripe_webhook_secret", "whsec_test")]),
        request,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

fn webhook_header() -> &'static str {
    rally::web::webhook::SIGNATURE_HEADER
}

#[tokio::test]
async fn serves_marketing_pages() {
    for path in ["/", "/about", "/programs", "/contact", "/checkout/cancelled"] {
        let response = get(path).await;
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/html"));
    }
}

#[tokio::test]
async fn pricing_page_renders_tiers() {
    let response = get("/pricing").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("<td>Elite</td>"));
    assert!(!body.contains("<!-- tiers -->"));
}

#[tokio::test]
async fn unknown_paths_get_not_found() {
    let page = get("/no-such-page").await;
    assert_eq!(page.status(), StatusCode::NOT_FOUND);
    assert!(body_text(page).await.contains("Page not found"));

    let api = get("/api/no-such-endpoint").await;
    assert_eq!(api.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(api).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let response = get("/robots.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert!(body_text(response).await.contains("Disallow: /api/"));
}

#[tokio::test]
async fn upstream_request_id_is_echoed() {
    let request = Request::get("/api/memberships")
        .header("x-request-id", "edge-1234")
        .body(Body::empty())
        .unwrap();
    let response = send(offline_state(&[]), request).await;
    assert_eq!(response.headers().get("x-request-id").unwrap(), "edge-1234");
}

#[tokio::test]
async fn sign_in_attempts_are_throttled_per_address() {
    let router = create_router(offline_state(&[]));
    let attempt = || {
        Request::post("/api/auth/login")
            .header("x-real-ip", "198.51.100.23")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap()
    };

    for _ in 0..5 {
        let response = router.clone().oneshot(attempt()).await.unwrap();
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let limited = router.clone().oneshot(attempt()).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = limited.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    assert!(limited.headers().contains_key("x-request-id"));
    assert_eq!(body_json(limited).await["code"], "RATE_LIMITED");

    // A different address still gets through.
    let other = Request::post("/api/auth/login")
        .header("x-real-ip", "198.51.100.24")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = router.oneshot(other).await.unwrap();
    assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
