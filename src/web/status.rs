//! Health and status handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{trace, warn};
use ts_rs::TS;

use crate::data::health;
use crate::state::{AppState, ServiceStatus};

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
}

/// `GET /api/health`: `200` when the database answers, `503` otherwise.
pub(super) async fn health(State(state): State<AppState>) -> Response {
    match health::ping(&state.db_pool).await {
        Ok(latency) => {
            trace!(latency_ms = latency.as_millis() as u64, "health check");
            Json(json!({
                "status": "healthy",
                "databaseLatencyMs": latency.as_millis() as u64,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }))
            .into_response()
        }
        Err(e) => {
            warn!(error = ?e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
                .into_response()
        }
    }
}

/// Roll individual service statuses up into one.
fn overall_status(services: &BTreeMap<String, ServiceInfo>) -> ServiceStatus {
    if services.is_empty() {
        ServiceStatus::Disabled
    } else if services.values().any(|s| s.status == ServiceStatus::Error) {
        ServiceStatus::Error
    } else if services.values().any(|s| s.status == ServiceStatus::Starting) {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    }
}

/// `GET /api/status`: version and per-service status.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();
    for (name, svc_status, _) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
            },
        );
    }

    Json(StatusResponse {
        status: overall_status(&services),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services(statuses: &[(&str, ServiceStatus)]) -> BTreeMap<String, ServiceInfo> {
        statuses
            .iter()
            .map(|(name, status)| {
                (
                    name.to_string(),
                    ServiceInfo {
                        name: name.to_string(),
                        status: *status,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn rolls_up_service_statuses() {
        assert_eq!(overall_status(&services(&[])), ServiceStatus::Disabled);
        assert_eq!(
            overall_status(&services(&[
                ("web", ServiceStatus::Active),
                ("maintenance", ServiceStatus::Active)
            ])),
            ServiceStatus::Active
        );
        assert_eq!(
            overall_status(&services(&[
                ("web", ServiceStatus::Active),
                ("maintenance", ServiceStatus::Starting)
            ])),
            ServiceStatus::Starting
        );
        assert_eq!(
            overall_status(&services(&[
                ("web", ServiceStatus::Active),
                ("maintenance", ServiceStatus::Error)
            ])),
            ServiceStatus::Error
        );
    }
}
