//! ---
//! ecc_section: "06-daemon"
//! ecc_subsection: "binary"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Service hosting and lifecycle for the control center daemon."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use ecc_common::config::AppConfig;
use ecc_common::time::machine_name;
use ecc_config::{build_store, ConfigStore};
use ecc_metrics::SharedRegistry;
use ecc_msg::{BusClient, BusMetrics, DeliveryGuarantee, InMemoryBus, ServiceIdentity, WireCodec};
use ecc_registry::{Aggregator, CommandClient, RegistryMetrics, ServiceRegistry};
use ecc_service::{EquipmentService, ServiceHandle};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::ApiState;

/// Everything the daemon runs on one in-process bus.
pub struct Daemon {
    config: AppConfig,
    services: Vec<ServiceHandle>,
    registry: Arc<ServiceRegistry>,
    client: Arc<CommandClient>,
    store: Arc<dyn ConfigStore>,
    metrics: Option<SharedRegistry>,
    shutdown: broadcast::Sender<()>,
    aggregator: JoinHandle<()>,
}

impl Daemon {
    pub fn start(config: AppConfig, metrics: Option<SharedRegistry>) -> Result<Self> {
        let transport = InMemoryBus::new();
        let mut bus = BusClient::new(
            Arc::new(transport),
            WireCodec::new(config.bus.wire_format),
            DeliveryGuarantee::from_config(&config.bus),
        );
        let mut registry = ServiceRegistry::new(config.registry.online_threshold);
        let mut registry_metrics = None;
        if let Some(prometheus) = &metrics {
            let exporter =
                BusMetrics::register(prometheus).context("failed to register bus metrics")?;
            bus = bus.with_metrics(Arc::new(exporter));
            let handles = RegistryMetrics::register(prometheus)
                .context("failed to register registry metrics")?;
            registry = registry.with_metrics(handles.clone());
            registry_metrics = Some(handles);
        }
        let registry = Arc::new(registry);

        let (shutdown, _) = broadcast::channel(1);
        // Join the consumer group before any service registers.
        let group = &config.registry.consumer_group;
        let aggregator = Aggregator::subscribe(&bus, group, registry.clone())
            .context("failed to join registry consumer group")?
            .spawn(shutdown.subscribe());

        let mut client = CommandClient::start(
            bus.fork(),
            format!("client.eccd.{}", machine_name()),
            config.command.default_timeout,
        )
        .context("failed to start command client")?
        .with_requested_by("eccd");
        if let Some(handles) = registry_metrics {
            client = client.with_metrics(handles);
        }

        let store = build_store(&config.config_store).context("failed to build config store")?;

        let mut services = Vec::with_capacity(config.services.len());
        for (name, service) in &config.services {
            let handle = EquipmentService::from_config(name, service, &config, &bus, store.clone())
                .and_then(EquipmentService::start)
                .with_context(|| format!("failed to start equipment service '{name}'"))?;
            services.push(handle);
        }
        if services.is_empty() {
            warn!("no equipment services configured; running registry and API only");
        }
        info!(
            hosted = services.len(),
            backend = store.name(),
            wire_format = ?config.bus.wire_format,
            "daemon started"
        );

        Ok(Self {
            config,
            services,
            registry,
            client: Arc::new(client),
            store,
            metrics,
            shutdown,
            aggregator,
        })
    }

    pub fn hosted(&self) -> Vec<ServiceIdentity> {
        self.services
            .iter()
            .map(|service| service.identity().clone())
            .collect()
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            equipment: self.hosted(),
            registry: self.registry.clone(),
            client: self.client.clone(),
            store: self.store.clone(),
            config_store: self.config.config_store.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Stop hosted services first so their final events reach the registry.
    pub async fn shutdown(self) {
        for service in self.services {
            service.shutdown().await;
        }
        let _ = self.shutdown.send(());
        if let Err(err) = self.aggregator.await {
            warn!(error = %err, "registry aggregator ended abnormally");
        }
        info!("daemon stopped");
    }
}
