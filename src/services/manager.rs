use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Service;
use crate::utils::fmt_duration;

/// How a spawned service ended.
#[derive(Debug)]
pub enum ServiceExit {
    Completed,
    Failed(anyhow::Error),
    Panicked,
}

/// Owns registered services, spawns them and coordinates shutdown.
pub struct ServiceManager {
    registered: Vec<(String, Box<dyn Service>)>,
    running: HashMap<String, JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    exit_tx: mpsc::UnboundedSender<(String, ServiceExit)>,
    exit_rx: mpsc::UnboundedReceiver<(String, ServiceExit)>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            registered: Vec::new(),
            running: HashMap::new(),
            shutdown_tx,
            exit_tx,
            exit_rx,
        }
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) {
        let name = service.name();
        debug!(service = name, "Registered service");
        self.registered.push((name.to_owned(), service));
    }

    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.running.is_empty()
    }

    /// Spawn every registered service on the runtime.
    pub fn spawn_all(&mut self) {
        for (name, service) in self.registered.drain(..) {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let exit_tx = self.exit_tx.clone();
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                let inner = tokio::spawn(service.run(shutdown_rx));
                let exit = match inner.await {
                    Ok(Ok(())) => ServiceExit::Completed,
                    Ok(Err(e)) => ServiceExit::Failed(e),
                    Err(_) => ServiceExit::Panicked,
                };
                let _ = exit_tx.send((task_name, exit));
            });
            info!(service = %name, "Service spawned");
            self.running.insert(name, handle);
        }
    }

    /// Wait until any running service ends on its own.
    pub async fn next_exit(&mut self) -> Option<(String, ServiceExit)> {
        if self.running.is_empty() {
            return None;
        }
        let (name, exit) = self.exit_rx.recv().await?;
        self.running.remove(&name);
        Some((name, exit))
    }

    /// Signal every service to stop and wait up to `timeout` for them.
    ///
    /// Returns the names of services that did not stop in time.
    pub async fn shutdown(mut self, timeout: Duration) -> Vec<String> {
        let started = Instant::now();
        let _ = self.shutdown_tx.send(());
        let count = self.running.len();
        info!(services = count, timeout = fmt_duration(timeout), "Shutting down services");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut stragglers = Vec::new();
        for (name, handle) in self.running.drain() {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(_) => debug!(service = %name, "Service stopped"),
                Err(_) => {
                    warn!(service = %name, "Service did not stop before the shutdown timeout");
                    stragglers.push(name);
                }
            }
        }

        while let Ok((name, exit)) = self.exit_rx.try_recv() {
            if let ServiceExit::Failed(e) = exit {
                error!(service = %name, error = ?e, "Service failed during shutdown");
            }
        }

        info!(elapsed = fmt_duration(started.elapsed()), "Services shut down");
        stragglers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct UntilShutdown;

    #[async_trait]
    impl Service for UntilShutdown {
        fn name(&self) -> &'static str {
            "until-shutdown"
        }

        async fn run(self: Box<Self>, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
            let _ = shutdown.recv().await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(self: Box<Self>, _shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Stubborn;

    #[async_trait]
    impl Service for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        async fn run(self: Box<Self>, _shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn reports_failed_service() {
        let mut manager = ServiceManager::new();
        manager.register_service(Box::new(Failing));
        manager.register_service(Box::new(UntilShutdown));
        manager.spawn_all();

        let (name, exit) = manager.next_exit().await.expect("a service exits");
        assert_eq!(name, "failing");
        assert!(matches!(exit, ServiceExit::Failed(_)));

        let stragglers = manager.shutdown(Duration::from_secs(1)).await;
        assert!(stragglers.is_empty());
    }

    #[tokio::test]
    async fn shutdown_times_out_on_stuck_service() {
        let mut manager = ServiceManager::new();
        manager.register_service(Box::new(Stubborn));
        manager.spawn_all();
        let stragglers = manager.shutdown(Duration::from_millis(50)).await;
        assert_eq!(stragglers, vec!["stubborn".to_string()]);
    }

    #[test]
    fn empty_manager_has_no_services() {
        assert!(!ServiceManager::new().has_services());
    }
}
