//! ---
//! ecc_section: "05-registry-and-commands"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Registry mirror and command dispatch."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ecc_msg::{BusClient, Inbox, MessagingError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::registry::ServiceRegistry;

/// Feeds the registry from a consumer group and keeps its gauges fresh.
pub struct Aggregator {
    registry: Arc<ServiceRegistry>,
    inbox: Inbox,
    refresh: Duration,
}

impl Aggregator {
    /// Join `group` on the bus. Broadcasts published before this call are not seen.
    pub fn subscribe(
        bus: &BusClient,
        group: &str,
        registry: Arc<ServiceRegistry>,
    ) -> Result<Self, MessagingError> {
        let inbox = bus.subscribe(group)?;
        let refresh = registry.online_threshold() / 2;
        Ok(Self {
            registry,
            inbox,
            refresh,
        })
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn spawn(mut self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(group = self.inbox.address(), "registry aggregator starting");
            let mut ticker = tokio::time::interval(self.refresh.max(Duration::from_millis(100)));
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => self.registry.refresh_gauges(),
                    message = self.inbox.next() => match message {
                        Some(message) => {
                            self.registry.apply(&message);
                        }
                        None => break,
                    },
                }
            }
            info!("registry aggregator stopped");
        })
    }
}
