//! Long-running services and their lifecycle.

pub mod manager;
pub mod signals;
pub mod web;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// A unit of work that runs until it finishes or is told to stop.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run the service. Implementations must return promptly once `shutdown`
    /// receives a message.
    async fn run(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()>;
}
