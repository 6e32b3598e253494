//! Background sweep that releases lapsed holds and refills sessions.
//!
//! Each cycle expires `pending` bookings and registrations whose hold has
//! passed, promotes waitlists for the sessions that lost a seat, and drops
//! expired login sessions. The last successful sweep is persisted in
//! `app_kv` so admins can see when it last ran.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::booking::registrations;
use crate::cli::ServiceName;
use crate::data::{bookings, kv, registrations as registration_rows, user_sessions};
use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::utils::{fmt_duration, log_if_slow};

/// `app_kv` key holding the RFC 3339 time of the last completed sweep.
pub const KV_LAST_SWEEP: &str = "maintenance.last_sweep";

const SLOW_SWEEP: Duration = Duration::from_secs(5);

/// Counts from a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_bookings: u64,
    pub expired_registrations: u64,
    pub promoted: usize,
    pub purged_sessions: u64,
    pub pruned_cache_entries: usize,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        *self == SweepReport::default()
    }
}

/// Run one sweep at `now`.
pub async fn sweep(state: &AppState, now: DateTime<Utc>) -> Result<SweepReport> {
    let pool = &state.db_pool;
    let mut report = SweepReport {
        expired_bookings: bookings::expire_pending(pool, now).await?,
        ..SweepReport::default()
    };

    let expired = registration_rows::expire_pending(pool, now).await?;
    report.expired_registrations = expired.count;
    let session_ids = expired.session_ids;

    let tz = state.config.facility_timezone;
    let promotions = join_all(
        session_ids
            .iter()
            .map(|&id| registrations::promote_session(pool, id, tz, now)),
    )
    .await;
    for (session_id, result) in session_ids.iter().zip(promotions) {
        match result {
            Ok(promoted) => report.promoted += promoted.len(),
            Err(e) => warn!(session_id = %session_id, error = ?e, "Waitlist promotion failed"),
        }
    }

    report.purged_sessions = user_sessions::purge_expired(pool).await?;
    report.pruned_cache_entries = state.session_cache.prune();
    state.rate_limit.retain_recent();

    if let Err(e) = kv::set_timestamp(pool, KV_LAST_SWEEP, now).await {
        warn!(error = ?e, "Failed to persist maintenance sweep timestamp");
    }
    Ok(report)
}

/// Periodic sweeper registered as the `maintenance` service.
pub struct MaintenanceService {
    state: AppState,
    interval: Duration,
}

impl MaintenanceService {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    async fn tick(&self) {
        let started = std::time::Instant::now();
        match sweep(&self.state, Utc::now()).await {
            Ok(report) => {
                self.state
                    .service_statuses
                    .set(ServiceName::Maintenance.as_str(), ServiceStatus::Active);
                if report.is_quiet() {
                    debug!("Maintenance sweep found nothing to do");
                } else {
                    info!(
                        expired_bookings = report.expired_bookings,
                        expired_registrations = report.expired_registrations,
                        promoted = report.promoted,
                        purged_sessions = report.purged_sessions,
                        pruned_cache_entries = report.pruned_cache_entries,
                        "Maintenance sweep completed"
                    );
                }
            }
            Err(e) => {
                self.state
                    .service_statuses
                    .set(ServiceName::Maintenance.as_str(), ServiceStatus::Error);
                error!(error = ?e, "Maintenance sweep failed");
            }
        }
        log_if_slow(started, SLOW_SWEEP, "maintenance sweep");
    }
}

#[async_trait]
impl Service for MaintenanceService {
    fn name(&self) -> &'static str {
        ServiceName::Maintenance.as_str()
    }

    async fn run(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        self.state
            .service_statuses
            .set(self.name(), ServiceStatus::Starting);
        info!(interval = fmt_duration(self.interval), "Maintenance service started");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("Maintenance service shutting down");
                    self.state
                        .service_statuses
                        .set(self.name(), ServiceStatus::Disabled);
                    return Ok(());
                }
            }
        }
    }
}
