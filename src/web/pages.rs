//! Embedded marketing pages and static assets.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::response::{Html, IntoResponse, Response};
use rust_embed::RustEmbed;
use std::borrow::Cow;
use tracing::warn;

use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::memberships::{TierInfo, tiers};

#[derive(RustEmbed)]
#[folder = "web/public/"]
#[exclude = "*.md"]
struct PageAssets;

/// Placeholder in `pricing.html` replaced with the rendered tier table.
const TIERS_PLACEHOLDER: &str = "<!-- tiers -->";

const PAGE_CACHE: &str = "public, max-age=300";
const ASSET_CACHE: &str = "public, max-age=86400";

fn embedded_text(name: &str) -> Option<Cow<'static, str>> {
    let file = PageAssets::get(name)?;
    Some(match file.data {
        Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes),
        Cow::Owned(bytes) => Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()),
    })
}

fn html_response(status: StatusCode, body: String) -> Response {
    let mut response = (status, Html(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(PAGE_CACHE));
    response
}

fn page(name: &str) -> Response {
    match embedded_text(name) {
        Some(body) => html_response(StatusCode::OK, body.into_owned()),
        None => {
            warn!(page = name, "Embedded page missing");
            not_found_page()
        }
    }
}

fn not_found_page() -> Response {
    let body = embedded_text("404.html")
        .map(Cow::into_owned)
        .unwrap_or_else(|| "<h1>Not found</h1>".to_string());
    let mut response = (StatusCode::NOT_FOUND, Html(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Render the tier catalogue as table rows.
pub fn render_tier_rows(tiers: &[TierInfo]) -> String {
    let mut rows = String::new();
    for tier in tiers {
        let free = if tier.weekly_free_sessions > 0 {
            format!("{} per week", tier.weekly_free_sessions)
        } else {
            "-".to_string()
        };
        let action = if tier.purchasable {
            format!(
                r#"<button class="join" data-tier="{}">Join</button>"#,
                html_escape::encode_double_quoted_attribute(tier.tier.as_str())
            )
        } else {
            String::new()
        };
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}%</td><td>{}%</td><td>{}</td><td>{}</td></tr>\n",
            html_escape::encode_text(tier.name),
            tier.court_discount_pct,
            tier.session_discount_pct,
            html_escape::encode_text(&free),
            action,
        ));
    }
    rows
}

pub async fn home() -> Response {
    page("index.html")
}

pub async fn about() -> Response {
    page("about.html")
}

pub async fn programs() -> Response {
    page("programs.html")
}

pub async fn contact() -> Response {
    page("contact.html")
}

pub async fn checkout_success() -> Response {
    page("checkout-success.html")
}

pub async fn checkout_cancelled() -> Response {
    page("checkout-cancelled.html")
}

/// `GET /pricing`: the tier table reflects which tiers can be bought.
pub async fn pricing(State(state): State<AppState>) -> Response {
    let Some(template) = embedded_text("pricing.html") else {
        warn!("Embedded pricing page missing");
        return not_found_page();
    };
    let rows = render_tier_rows(&tiers(&state.prices, state.stripe.is_some()));
    html_response(StatusCode::OK, template.replace(TIERS_PLACEHOLDER, &rows))
}

/// Serve an embedded static asset, or `None` when no such file exists.
pub fn try_serve_asset(path: &str) -> Option<Response> {
    let name = path.trim_start_matches('/');
    if name.is_empty() || name.ends_with(".html") {
        return None;
    }
    let file = PageAssets::get(name)?;
    let mime = mime_guess::from_path(name).first_or_octet_stream();

    let mut response = file.data.into_owned().into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(ASSET_CACHE));
    Some(response)
}

/// Static assets first, then a 404 page. Unknown `/api/` paths get JSON.
pub async fn fallback(uri: Uri) -> Response {
    let path = uri.path();
    if path.starts_with("/api/") || path == "/api" {
        return ApiError::new(ApiErrorCode::NotFound, format!("No route for {path}")).into_response();
    }
    try_serve_asset(path).unwrap_or_else(not_found_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe::PriceTable;

    #[test]
    fn every_page_is_embedded() {
        for name in [
            "index.html",
            "about.html",
            "programs.html",
            "pricing.html",
            "contact.html",
            "checkout-success.html",
            "checkout-cancelled.html",
            "404.html",
            "style.css",
        ] {
            assert!(PageAssets::get(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn pricing_template_has_placeholder() {
        let template = embedded_text("pricing.html").unwrap();
        assert!(template.contains(TIERS_PLACEHOLDER));
    }

    #[test]
    fn tier_rows_mark_purchasable_tiers() {
        let prices = PriceTable {
            elite: Some("price_elite".into()),
            ..Default::default()
        };
        let rows = render_tier_rows(&tiers(&prices, true));
        assert_eq!(rows.lines().count(), 4);
        assert!(rows.contains(r#"data-tier="elite""#));
        assert!(!rows.contains(r#"data-tier="basic""#));
        assert!(rows.contains("3 per week"));
    }

    #[test]
    fn serves_assets_with_mime_type() {
        let response = try_serve_asset("/style.css").unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css"
        );
        assert!(try_serve_asset("/index.html").is_none());
        assert!(try_serve_asset("/missing.js").is_none());
    }
}
