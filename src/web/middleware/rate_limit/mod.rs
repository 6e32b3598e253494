//! Per-IP rate limiting with keyed token buckets.
//!
//! Every request is checked against a global budget, then against its route
//! group, then against any endpoint with its own tighter budget (sign-in,
//! checkout, booking writes). The first exhausted bucket rejects the request
//! with `429` and a `Retry-After` header. Stripe webhooks and health checks
//! are never limited.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::Response;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::warn;

use crate::web::middleware::client_ip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteGroup {
    Api,
    Pages,
    Admin,
    /// Health checks and provider callbacks.
    Exempt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackedEndpoint {
    Auth,
    Checkout,
    BookingWrite,
}

fn classify_route(path: &str) -> RouteGroup {
    if path == "/api/health" || path == "/api/stripe/webhook" {
        RouteGroup::Exempt
    } else if path.starts_with("/api/admin/") {
        RouteGroup::Admin
    } else if path.starts_with("/api/") {
        RouteGroup::Api
    } else {
        RouteGroup::Pages
    }
}

fn classify_endpoint(method: &Method, path: &str) -> Option<TrackedEndpoint> {
    if *method != Method::POST {
        return None;
    }
    if path == "/api/auth/login" || path == "/api/auth/signup" {
        Some(TrackedEndpoint::Auth)
    } else if path.starts_with("/api/checkout/")
        || path == "/api/billing-portal"
        || (path.starts_with("/api/registrations/") && path.ends_with("/checkout"))
    {
        Some(TrackedEndpoint::Checkout)
    } else if path == "/api/bookings"
        || (path.starts_with("/api/sessions/") && path.ends_with("/register"))
    {
        Some(TrackedEndpoint::BookingWrite)
    } else {
        None
    }
}

/// `count` requests per `period`, all available as a burst.
fn quota(count: u32, period: Duration) -> Quota {
    let count = NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period / count.get())
        .unwrap_or_else(|| Quota::per_second(count))
        .allow_burst(count)
}

pub struct RateLimitState {
    global: [DefaultKeyedRateLimiter<IpAddr>; 2],
    api: [DefaultKeyedRateLimiter<IpAddr>; 2],
    pages: [DefaultKeyedRateLimiter<IpAddr>; 1],
    admin: [DefaultKeyedRateLimiter<IpAddr>; 1],
    auth: [DefaultKeyedRateLimiter<IpAddr>; 2],
    checkout: [DefaultKeyedRateLimiter<IpAddr>; 2],
    booking_write: [DefaultKeyedRateLimiter<IpAddr>; 2],
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new()
    }
}

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

impl RateLimitState {
    pub fn new() -> Self {
        Self {
            global: [
                RateLimiter::keyed(quota(20, 5 * SECOND)),
                RateLimiter::keyed(quota(180, MINUTE)),
            ],
            api: [
                RateLimiter::keyed(quota(90, MINUTE)),
                RateLimiter::keyed(quota(1500, HOUR)),
            ],
            pages: [RateLimiter::keyed(quota(60, MINUTE))],
            admin: [RateLimiter::keyed(quota(60, MINUTE))],
            auth: [
                RateLimiter::keyed(quota(5, MINUTE)),
                RateLimiter::keyed(quota(30, HOUR)),
            ],
            checkout: [
                RateLimiter::keyed(quota(6, MINUTE)),
                RateLimiter::keyed(quota(60, HOUR)),
            ],
            booking_write: [
                RateLimiter::keyed(quota(10, MINUTE)),
                RateLimiter::keyed(quota(120, HOUR)),
            ],
        }
    }

    fn limiters_for(&self, method: &Method, path: &str) -> Vec<&DefaultKeyedRateLimiter<IpAddr>> {
        let group: &[DefaultKeyedRateLimiter<IpAddr>] = match classify_route(path) {
            RouteGroup::Exempt => return Vec::new(),
            RouteGroup::Api => &self.api,
            RouteGroup::Pages => &self.pages,
            RouteGroup::Admin => &self.admin,
        };
        let endpoint: &[DefaultKeyedRateLimiter<IpAddr>] = match classify_endpoint(method, path) {
            Some(TrackedEndpoint::Auth) => &self.auth,
            Some(TrackedEndpoint::Checkout) => &self.checkout,
            Some(TrackedEndpoint::BookingWrite) => &self.booking_write,
            None => &[],
        };
        self.global.iter().chain(group).chain(endpoint).collect()
    }

    /// `Err(retry_after_secs)` when any applicable bucket is empty.
    ///
    /// Every applicable bucket is charged, so a rejected request still counts
    /// against the budgets that did admit it.
    fn check(&self, ip: IpAddr, method: &Method, path: &str) -> Result<(), u64> {
        let now = DefaultClock::default().now();
        let longest_wait = self
            .limiters_for(method, path)
            .into_iter()
            .filter_map(|limiter| limiter.check_key(&ip).err())
            .map(|not_until| not_until.wait_time_from(now))
            .max();
        match longest_wait {
            Some(wait) => Err(wait.as_secs().max(1)),
            None => Ok(()),
        }
    }

    /// Drop idle buckets so the key space does not grow without bound.
    pub fn retain_recent(&self) {
        for limiter in self
            .global
            .iter()
            .chain(&self.api)
            .chain(&self.pages)
            .chain(&self.admin)
            .chain(&self.auth)
            .chain(&self.checkout)
            .chain(&self.booking_write)
        {
            limiter.retain_recent();
        }
    }
}

pub type SharedRateLimitState = Arc<RateLimitState>;

#[derive(Clone)]
pub struct RateLimitLayer {
    state: SharedRateLimitState,
}

impl RateLimitLayer {
    pub fn new(state: SharedRateLimitState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: SharedRateLimitState,
}

impl<S, ResBody> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response<ResBody>> + Send + Clone + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug + Send,
    ResBody: Send + 'static,
    Body: Into<ResBody>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let Some(ip) = client_ip::resolve(req.headers(), peer) else {
            return Box::pin(self.inner.call(req));
        };

        match self.state.check(ip, req.method(), req.uri().path()) {
            Ok(()) => Box::pin(self.inner.call(req)),
            Err(retry_after) => {
                warn!(
                    client_ip = %ip,
                    method = %req.method(),
                    path = req.uri().path(),
                    retry_after_secs = retry_after,
                    "Rate limit exceeded"
                );
                let resp = rate_limit_response(retry_after).map(Into::into);
                Box::pin(async move { Ok(resp) })
            }
        }
    }
}

fn rate_limit_response(retry_after: u64) -> Response<Body> {
    let body = serde_json::json!({
        "code": "RATE_LIMITED",
        "message": format!("Too many requests. Retry after {retry_after} seconds."),
        "details": null,
    });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("retry-after", HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 0, 2, last])
    }

    #[test]
    fn classifies_routes() {
        assert_eq!(classify_route("/api/health"), RouteGroup::Exempt);
        assert_eq!(classify_route("/api/stripe/webhook"), RouteGroup::Exempt);
        assert_eq!(classify_route("/api/admin/users"), RouteGroup::Admin);
        assert_eq!(classify_route("/api/courts"), RouteGroup::Api);
        assert_eq!(classify_route("/pricing"), RouteGroup::Pages);
    }

    #[test]
    fn classifies_tracked_endpoints() {
        let post = Method::POST;
        assert_eq!(classify_endpoint(&post, "/api/auth/login"), Some(TrackedEndpoint::Auth));
        assert_eq!(
            classify_endpoint(&post, "/api/checkout/membership"),
            Some(TrackedEndpoint::Checkout)
        );
        assert_eq!(
            classify_endpoint(&post, "/api/registrations/abc/checkout"),
            Some(TrackedEndpoint::Checkout)
        );
        assert_eq!(
            classify_endpoint(&post, "/api/sessions/abc/register"),
            Some(TrackedEndpoint::BookingWrite)
        );
        assert_eq!(classify_endpoint(&Method::GET, "/api/bookings"), None);
        assert_eq!(classify_endpoint(&post, "/api/bookings/quote"), None);
    }

    #[test]
    fn auth_budget_is_tight_and_per_ip() {
        let state = RateLimitState::new();
        for _ in 0..5 {
            assert!(state.check(ip(1), &Method::POST, "/api/auth/login").is_ok());
        }
        let retry = state
            .check(ip(1), &Method::POST, "/api/auth/login")
            .unwrap_err();
        assert!(retry >= 1);
        assert!(state.check(ip(2), &Method::POST, "/api/auth/login").is_ok());
        // Reads still go through for the throttled address.
        assert!(state.check(ip(1), &Method::GET, "/api/courts").is_ok());
    }

    #[test]
    fn exempt_routes_are_never_limited() {
        let state = RateLimitState::new();
        for _ in 0..500 {
            assert!(state.check(ip(3), &Method::POST, "/api/stripe/webhook").is_ok());
        }
    }

    #[test]
    fn response_carries_retry_after() {
        let resp = rate_limit_response(7);
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["retry-after"], "7");
    }
}
