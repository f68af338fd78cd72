//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Wires one profile into a running service: state store, outbox, command
//! consumer, heartbeat loop, and the delayed registration.

use std::sync::Arc;
use std::time::Duration;

use ecc_common::config::{AppConfig, HeartbeatConfig, ServiceConfig};
use ecc_common::time::machine_name;
use ecc_config::{ConfigStore, ServiceConfigProvider};
use ecc_msg::{service_endpoint, BusClient, ServiceIdentity, StateValue};
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consumer::CommandConsumer;
use crate::executor::ControlExecutor;
use crate::heartbeat::HeartbeatEmitter;
use crate::profiles;
use crate::registration::{seed_state, RegistrationPublisher};
use crate::state::{Outbox, StateStore};
use crate::ServiceError;

/// A configured service that has not started its tasks yet.
pub struct EquipmentService {
    identity: Arc<ServiceIdentity>,
    state: Arc<StateStore>,
    outbox: Outbox,
    executor: Arc<ControlExecutor>,
    initial_state: Vec<(String, StateValue)>,
    provider: ServiceConfigProvider,
    bus: BusClient,
    heartbeat: HeartbeatConfig,
    registration_delay: Duration,
}

impl EquipmentService {
    /// Build a service from its `[services.<name>]` section.
    pub fn from_config(
        name: &str,
        service: &ServiceConfig,
        app: &AppConfig,
        bus: &BusClient,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self, ServiceError> {
        let profile = profiles::build(service.profile)?;
        let mut metadata = profile.metadata.clone();
        metadata.extend(
            service
                .metadata
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        let identity = Arc::new(ServiceIdentity {
            service_id: service
                .service_id
                .clone()
                .unwrap_or_else(|| format!("{}-{}", profile.kind.as_str(), Uuid::new_v4())),
            service_name: service
                .service_name
                .clone()
                .unwrap_or_else(|| name.to_owned()),
            machine_name: machine_name(),
            equipment_type: profile.equipment_type.to_owned(),
            manufacturer: service
                .manufacturer
                .clone()
                .unwrap_or_else(|| profile.manufacturer.to_owned()),
            version: service
                .version
                .clone()
                .unwrap_or_else(|| profile.version.to_owned()),
            metadata,
        });
        info!(
            service = name,
            service_id = %identity.service_id,
            profile = profile.kind.as_str(),
            "equipment service configured"
        );

        let (state, outbox) = StateStore::new(identity.clone());
        let executor = Arc::new(ControlExecutor::new(profile.controls, state.clone()));
        let provider = ServiceConfigProvider::new(store, identity.service_name.clone())
            .with_retry(&app.config_store);

        Ok(Self {
            identity,
            state,
            outbox,
            executor,
            initial_state: profile.initial_state,
            provider,
            bus: bus.fork(),
            heartbeat: app.heartbeat.clone(),
            registration_delay: app.registration.delay,
        })
    }

    pub fn identity(&self) -> &Arc<ServiceIdentity> {
        &self.identity
    }

    /// Bind the command endpoint and spawn every service task.
    pub fn start(self) -> Result<ServiceHandle, ServiceError> {
        let inbox = self.bus.bind(&service_endpoint(&self.identity.service_id))?;
        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = Vec::with_capacity(4);

        tasks.push(self.outbox.spawn(self.bus.clone(), shutdown.subscribe()));
        seed_state(
            self.state.as_ref(),
            &self.initial_state,
            &self.executor.definitions(),
        );

        let consumer = CommandConsumer::new(
            self.identity.service_id.clone(),
            self.executor.clone(),
            self.bus.clone(),
        );
        tasks.push(consumer.spawn(inbox, shutdown.subscribe()));

        let heartbeat = Arc::new(
            HeartbeatEmitter::new(
                self.identity.clone(),
                self.state.clone(),
                self.bus.clone(),
                self.heartbeat.clone(),
            )
            .with_provider(self.provider.clone()),
        );
        tasks.push(heartbeat.clone().spawn(shutdown.subscribe()));

        let registration = RegistrationPublisher::new(
            self.identity.clone(),
            self.executor.definitions(),
            self.bus.clone(),
            self.registration_delay,
        );
        tasks.push(registration.spawn(shutdown.subscribe()));

        info!(service_id = %self.identity.service_id, "equipment service started");
        Ok(ServiceHandle {
            identity: self.identity,
            state: self.state,
            executor: self.executor,
            provider: self.provider,
            heartbeat,
            shutdown,
            tasks,
        })
    }
}

/// A running service. Dropping the handle leaves the tasks running; call
/// [`ServiceHandle::shutdown`] to stop them.
pub struct ServiceHandle {
    identity: Arc<ServiceIdentity>,
    state: Arc<StateStore>,
    executor: Arc<ControlExecutor>,
    provider: ServiceConfigProvider,
    heartbeat: Arc<HeartbeatEmitter>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn executor(&self) -> &Arc<ControlExecutor> {
        &self.executor
    }

    pub fn provider(&self) -> &ServiceConfigProvider {
        &self.provider
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeat.count()
    }

    /// Broadcast shutdown and wait for every task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for result in join_all(self.tasks).await {
            if let Err(err) = result {
                warn!(
                    service_id = %self.identity.service_id,
                    error = %err,
                    "service task ended abnormally"
                );
            }
        }
        info!(service_id = %self.identity.service_id, "equipment service stopped");
    }
}
