//! Client IP resolution behind a reverse proxy.
//!
//! Order: `X-Real-IP`, then the rightmost `X-Forwarded-For` entry (the one
//! appended by our own proxy), then the socket peer address.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use http::request::Parts;

use crate::web::error::ApiError;

pub(crate) fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolve the client address from proxy headers, falling back to `peer`.
pub fn resolve(headers: &http::HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    header_str(headers, "x-real-ip")
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            header_str(headers, "x-forwarded-for")?
                .rsplit(',')
                .next()
                .map(str::trim)
                .and_then(|s| s.parse().ok())
        })
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// The resolved client IP address.
pub struct ClientIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        resolve(&parts.headers, peer)
            .map(ClientIp)
            .ok_or_else(|| ApiError::bad_request("Unable to determine client address"))
    }
}
