use std::net::SocketAddr;

use anyhow::Context;
use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

use super::Service;
use crate::cli::ServiceName;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;

/// HTTP server for the API, webhook and pages.
pub struct WebService {
    port: u16,
    app_state: AppState,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState) -> Self {
        Self { port, app_state }
    }
}

#[async_trait]
impl Service for WebService {
    fn name(&self) -> &'static str {
        ServiceName::Web.as_str()
    }

    async fn run(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let statuses = self.app_state.service_statuses.clone();
        let name = self.name();
        statuses.set(name, ServiceStatus::Starting);

        let app = create_router(self.app_state.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                statuses.set(name, ServiceStatus::Error);
                return Err(e).with_context(|| format!("Failed to bind {addr}"));
            }
        };

        let link = format!("http://localhost:{}", self.port);
        info!(service = name, address = %addr, link = %link, "web server listening");
        statuses.set(name, ServiceStatus::Active);

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            trace!(service = name, "graceful shutdown signal received");
        })
        .await;

        match result {
            Ok(()) => {
                info!(service = name, "web server stopped");
                statuses.set(name, ServiceStatus::Disabled);
                Ok(())
            }
            Err(e) => {
                warn!(service = name, error = ?e, "web server exited with error");
                statuses.set(name, ServiceStatus::Error);
                Err(e.into())
            }
        }
    }
}
