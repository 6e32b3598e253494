//! Application state shared by the web service and background maintenance.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use ts_rs::TS;

use crate::config::Config;
use crate::stripe::{PriceTable, StripeClient};
use crate::web::auth::session::SessionCache;
use crate::web::middleware::rate_limit::{RateLimitState, SharedRateLimitState};

/// Health status of a service.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status)
    }

    /// Snapshot of all statuses with seconds since each was reported, sorted by name.
    pub fn all(&self) -> Vec<(String, ServiceStatus, u64)> {
        let mut all: Vec<_> = self
            .inner
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.status,
                    entry.updated_at.elapsed().as_secs(),
                )
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Arc<Config>,
    /// `None` when no Stripe secret key is configured; paid flows are refused.
    pub stripe: Option<Arc<StripeClient>>,
    pub prices: Arc<PriceTable>,
    pub session_cache: SessionCache,
    pub service_statuses: ServiceStatusRegistry,
    pub rate_limit: SharedRateLimitState,
}

impl AppState {
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self> {
        let stripe = match config.stripe_secret_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(Arc::new(
                StripeClient::new(key.trim().to_owned(), &config.stripe_api_base)
                    .context("Failed to build Stripe client")?,
            )),
            _ => None,
        };
        let prices = PriceTable {
            basic: config.stripe_price_basic.clone(),
            premium: config.stripe_price_premium.clone(),
            elite: config.stripe_price_elite.clone(),
        };

        Ok(Self {
            session_cache: SessionCache::new(db_pool.clone()),
            db_pool,
            config: Arc::new(config),
            stripe,
            prices: Arc::new(prices),
            service_statuses: ServiceStatusRegistry::new(),
            rate_limit: Arc::new(RateLimitState::new()),
        })
    }

    pub fn stripe(&self) -> Option<&StripeClient> {
        self.stripe.as_deref()
    }

    /// Absolute URL on the public origin for `path`.
    pub fn public_url(&self, path: &str) -> String {
        match url::Url::parse(&self.config.public_origin).and_then(|base| base.join(path)) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}{path}",
                self.config.public_origin.trim_end_matches('/')
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_reports_sorted_snapshot() {
        let registry = ServiceStatusRegistry::new();
        registry.set("web", ServiceStatus::Active);
        registry.set("maintenance", ServiceStatus::Starting);
        registry.set("maintenance", ServiceStatus::Error);

        let names: Vec<String> = registry.all().into_iter().map(|(n, _, _)| n).collect();
        assert_eq!(names, vec!["maintenance", "web"]);
        assert_eq!(registry.get("maintenance"), Some(ServiceStatus::Error));
        assert_eq!(registry.get("missing"), None);
    }
}
