//! Per-request tracing spans and request ids.
//!
//! A well-formed `X-Request-Id` from the upstream proxy is reused so logs
//! correlate across hops; otherwise a ULID is generated. The id is echoed on
//! the response. Responses are logged at a level that follows their status.

use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Accept upstream ids that are short and printable.
fn upstream_id(req: &Request) -> Option<String> {
    let value = req.headers().get(REQUEST_ID_HEADER)?.to_str().ok()?;
    let valid = !value.is_empty()
        && value.len() <= 64
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    valid.then(|| value.to_owned())
}

#[derive(Clone)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S, B> Service<Request> for RequestIdService<S>
where
    S: Service<Request, Response = Response<B>> + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Debug,
    B: Send + 'static,
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
        let req_id = upstream_id(&req).unwrap_or_else(|| ulid::Ulid::new().to_string());
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let span = tracing::info_span!("request", req_id = %req_id);
        let header_value = HeaderValue::from_str(&req_id).ok();
        let start = Instant::now();

        let future = {
            let _entered = span.enter();
            self.inner.call(req)
        };

        Box::pin(
            async move {
                let mut result = future.await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match &result {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        match status {
                            500.. => tracing::warn!(%method, path = %path, status, duration_ms, "Response"),
                            400..=499 => tracing::info!(%method, path = %path, status, duration_ms, "Response"),
                            _ => tracing::debug!(%method, path = %path, status, duration_ms, "Response"),
                        }
                    }
                    Err(e) => {
                        tracing::error!(%method, path = %path, error = ?e, duration_ms, "Request failed");
                    }
                }

                if let Ok(response) = result.as_mut()
                    && let Some(value) = header_value
                {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                result
            }
            .instrument(span),
        )
    }
}
