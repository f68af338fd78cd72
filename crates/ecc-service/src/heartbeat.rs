//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ecc_common::config::HeartbeatConfig;
use ecc_config::{ServiceConfigProvider, DISPLAY_MESSAGE_KEY};
use ecc_msg::{
    BusClient, DeliveryGuarantee, HealthStatus, MessagePayload, MessagingError, ServiceHeartbeat,
    ServiceIdentity,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::StateAccess;

/// Periodically publishes a heartbeat with a full state snapshot.
pub struct HeartbeatEmitter {
    identity: Arc<ServiceIdentity>,
    state: Arc<dyn StateAccess>,
    bus: BusClient,
    config: HeartbeatConfig,
    provider: Option<ServiceConfigProvider>,
    started: Instant,
    counter: AtomicU64,
    display_message: Mutex<Option<String>>,
}

impl HeartbeatEmitter {
    pub fn new(
        identity: Arc<ServiceIdentity>,
        state: Arc<dyn StateAccess>,
        bus: BusClient,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            identity,
            state,
            bus,
            config,
            provider: None,
            started: Instant::now(),
            counter: AtomicU64::new(0),
            display_message: Mutex::new(None),
        }
    }

    /// Consult the config store for operator settings on every tick.
    pub fn with_provider(mut self, provider: ServiceConfigProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Heartbeats emitted so far.
    pub fn count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Interval before the next tick, clamped to the configured bounds.
    pub async fn next_interval(&self) -> Duration {
        let requested = match (&self.provider, &self.config.interval_key) {
            (Some(provider), Some(key)) => {
                provider.get_duration_ms(key, self.config.interval).await
            }
            _ => self.config.interval,
        };
        let interval = self.config.clamp(requested);
        if interval != requested {
            debug!(
                service_id = %self.identity.service_id,
                requested_ms = requested.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "heartbeat interval clamped"
            );
        }
        interval
    }

    /// Last operator display message read from the config store.
    pub fn display_message(&self) -> Option<String> {
        self.display_message.lock().clone()
    }

    /// Refresh operator settings between ticks and return the next interval.
    pub async fn poll_settings(&self) -> Duration {
        if let Some(provider) = &self.provider {
            match provider.get(DISPLAY_MESSAGE_KEY).await {
                Ok(Some(message)) => {
                    let mut current = self.display_message.lock();
                    if current.as_deref() != Some(message.as_str()) {
                        info!(
                            service_id = %self.identity.service_id,
                            display_message = %message,
                            "display message updated"
                        );
                        *current = Some(message);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(
                        service_id = %self.identity.service_id,
                        error = %err,
                        "display message unavailable"
                    );
                }
            }
        }
        self.next_interval().await
    }

    fn health(&self) -> HealthStatus {
        if self.bus.take_failures() > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Build and publish one heartbeat. Heartbeats are never retried.
    pub async fn beat(&self) -> Result<ServiceHeartbeat, MessagingError> {
        let heartbeat = ServiceHeartbeat {
            service_id: self.identity.service_id.clone(),
            service_name: self.identity.service_name.clone(),
            machine_name: self.identity.machine_name.clone(),
            timestamp: Utc::now(),
            health_status: self.health(),
            current_state: self.state.snapshot(),
            uptime: self.started.elapsed(),
            message_count: self.counter.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.bus
            .publish_with(
                MessagePayload::ServiceHeartbeat(heartbeat.clone()),
                DeliveryGuarantee::AtMostOnce,
            )
            .await?;
        debug!(
            service_id = %heartbeat.service_id,
            message_count = heartbeat.message_count,
            "heartbeat published"
        );
        Ok(heartbeat)
    }

    /// Publish immediately, then once per interval until shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(service_id = %self.identity.service_id, "heartbeat emitter starting");
            loop {
                if let Err(err) = self.beat().await {
                    warn!(
                        service_id = %self.identity.service_id,
                        error = %err,
                        "heartbeat publish failed"
                    );
                }
                let interval = tokio::select! {
                    _ = shutdown.recv() => break,
                    interval = self.poll_settings() => interval,
                };
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!(service_id = %self.identity.service_id, "heartbeat emitter stopped");
        })
    }
}
