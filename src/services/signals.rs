use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};

use super::manager::{ServiceExit, ServiceManager};

async fn terminate_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

/// Run until Ctrl+C, SIGTERM, or any service ending, then shut everything down.
pub async fn handle_shutdown_signals(mut manager: ServiceManager, timeout: Duration) -> ExitCode {
    let mut code = ExitCode::SUCCESS;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(e) => error!(error = ?e, "Failed to listen for Ctrl+C, shutting down"),
            }
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down");
        }
        exit = manager.next_exit() => {
            match exit {
                Some((name, ServiceExit::Completed)) => {
                    warn!(service = %name, "Service exited unexpectedly, shutting down");
                }
                Some((name, ServiceExit::Failed(e))) => {
                    error!(service = %name, error = ?e, "Service failed, shutting down");
                    code = ExitCode::FAILURE;
                }
                Some((name, ServiceExit::Panicked)) => {
                    error!(service = %name, "Service panicked, shutting down");
                    code = ExitCode::FAILURE;
                }
                None => warn!("No services running"),
            }
        }
    }

    let stragglers = manager.shutdown(timeout).await;
    if !stragglers.is_empty() {
        error!(services = ?stragglers, "Forced exit with services still running");
        return ExitCode::FAILURE;
    }
    code
}
