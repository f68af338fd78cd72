//! ---
//! ecc_section: "05-registry-and-commands"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Registry mirror and command dispatch."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Mirror of every service seen on the bus. Registration creates or refreshes
//! a record; heartbeats and state changes only ever update existing records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ecc_common::time::{elapsed_between, utc_now};
use ecc_msg::{
    ControlDefinition, HealthStatus, Message, MessagePayload, ServiceHeartbeat, ServiceIdentity,
    ServiceRegistered, ServiceState, ServiceStateChanged,
};
use serde::Serialize;
use serde_with::{serde_as, DurationMilliSeconds};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::metrics::RegistryMetrics;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("service '{0}' has not registered")]
    UnknownService(String),
}

/// Change notification for registry listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(String),
    Updated(String),
}

impl RegistryEvent {
    pub fn service_id(&self) -> &str {
        match self {
            RegistryEvent::Added(id) | RegistryEvent::Updated(id) => id,
        }
    }
}

/// Last known view of one service.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    #[serde(flatten)]
    pub identity: ServiceIdentity,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub health_status: HealthStatus,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub uptime: Duration,
    pub current_state: ServiceState,
    pub available_controls: Vec<ControlDefinition>,
}

impl ServiceRecord {
    fn from_registration(registered: &ServiceRegistered) -> Self {
        Self {
            identity: registered.identity.clone(),
            registered_at: registered.registered_at,
            last_heartbeat: registered.registered_at,
            health_status: HealthStatus::Unknown,
            uptime: Duration::ZERO,
            current_state: ServiceState::new(),
            available_controls: registered.available_controls.clone(),
        }
    }
}

/// A record plus its online flag at the time of the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub record: ServiceRecord,
    pub online: bool,
}

pub struct ServiceRegistry {
    records: DashMap<String, ServiceRecord>,
    events: broadcast::Sender<RegistryEvent>,
    online_threshold: Duration,
    metrics: Option<RegistryMetrics>,
}

impl ServiceRegistry {
    pub fn new(online_threshold: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: DashMap::new(),
            events,
            online_threshold,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: RegistryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn online_threshold(&self) -> Duration {
        self.online_threshold
    }

    /// Listen for added and updated records. Slow listeners may lag.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Route one bus message. Returns `true` when the mirror changed.
    pub fn apply(&self, message: &Message) -> bool {
        let outcome = match &message.payload {
            MessagePayload::ServiceRegistered(registered) => {
                self.register(registered);
                Ok(())
            }
            MessagePayload::ServiceHeartbeat(heartbeat) => self.record_heartbeat(heartbeat),
            MessagePayload::ServiceStateChanged(change) => self.apply_state_change(change),
            MessagePayload::ControlCommand(_) | MessagePayload::ControlCommandResponse(_) => {
                debug!(kind = message.kind(), "registry ignores command traffic");
                return false;
            }
        };
        match outcome {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    kind = message.kind(),
                    error = %err,
                    "registry update dropped"
                );
                false
            }
        }
    }

    /// Create or refresh a record. Health, state and last heartbeat survive a
    /// re-registration.
    pub fn register(&self, registered: &ServiceRegistered) -> RegistryEvent {
        let service_id = registered.identity.service_id.clone();
        let event = match self.records.entry(service_id.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.identity = registered.identity.clone();
                record.available_controls = registered.available_controls.clone();
                info!(service_id = %service_id, "service re-registered");
                RegistryEvent::Updated(service_id)
            }
            Entry::Vacant(entry) => {
                entry.insert(ServiceRecord::from_registration(registered));
                info!(
                    service_id = %service_id,
                    service_name = %registered.identity.service_name,
                    controls = registered.available_controls.len(),
                    "service registered"
                );
                RegistryEvent::Added(service_id)
            }
        };
        self.refresh_gauges();
        self.notify(event.clone());
        event
    }

    pub fn record_heartbeat(&self, heartbeat: &ServiceHeartbeat) -> Result<(), RegistryError> {
        {
            let mut record = self
                .records
                .get_mut(&heartbeat.service_id)
                .ok_or_else(|| RegistryError::UnknownService(heartbeat.service_id.clone()))?;
            record.last_heartbeat = heartbeat.timestamp;
            record.health_status = heartbeat.health_status;
            record.uptime = heartbeat.uptime;
            record.current_state = heartbeat.current_state.clone();
        }
        debug!(
            service_id = %heartbeat.service_id,
            message_count = heartbeat.message_count,
            "heartbeat mirrored"
        );
        self.notify(RegistryEvent::Updated(heartbeat.service_id.clone()));
        Ok(())
    }

    pub fn apply_state_change(&self, change: &ServiceStateChanged) -> Result<(), RegistryError> {
        {
            let mut record = self
                .records
                .get_mut(&change.service_id)
                .ok_or_else(|| RegistryError::UnknownService(change.service_id.clone()))?;
            record
                .current_state
                .insert(change.state_key.clone(), change.new_value.clone());
        }
        debug!(service_id = %change.service_id, key = %change.state_key, "state change mirrored");
        self.notify(RegistryEvent::Updated(change.service_id.clone()));
        Ok(())
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceRecord> {
        self.records.get(service_id).map(|record| record.clone())
    }

    /// All records ordered by service id.
    pub fn list(&self) -> Vec<ServiceRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.identity.service_id.cmp(&b.identity.service_id));
        records
    }

    pub fn online_services(&self) -> Vec<ServiceRecord> {
        let now = utc_now();
        self.list()
            .into_iter()
            .filter(|record| self.is_online_at(record, now))
            .collect()
    }

    /// Online while the last heartbeat is strictly younger than the threshold.
    pub fn is_online_at(&self, record: &ServiceRecord, now: DateTime<Utc>) -> bool {
        elapsed_between(record.last_heartbeat, now) < self.online_threshold
    }

    pub fn status(&self, service_id: &str) -> Option<ServiceStatus> {
        let now = utc_now();
        self.get(service_id).map(|record| ServiceStatus {
            online: self.is_online_at(&record, now),
            record,
        })
    }

    pub fn statuses(&self) -> Vec<ServiceStatus> {
        let now = utc_now();
        self.list()
            .into_iter()
            .map(|record| ServiceStatus {
                online: self.is_online_at(&record, now),
                record,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Recompute the known and online gauges.
    pub fn refresh_gauges(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let now = utc_now();
        let online = self
            .records
            .iter()
            .filter(|record| self.is_online_at(record.value(), now))
            .count();
        metrics.set_known(self.records.len());
        metrics.set_online(online);
    }

    fn notify(&self, event: RegistryEvent) {
        // No listeners is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use ecc_msg::{Metadata, StateValue};
    use prometheus::Registry;

    use crate::metrics::RegistryMetrics;

    fn identity(id: &str, name: &str) -> ServiceIdentity {
        ServiceIdentity {
            service_id: id.into(),
            service_name: name.into(),
            machine_name: "bench".into(),
            equipment_type: "CNC".into(),
            manufacturer: "Generic".into(),
            version: "1.0.0".into(),
            metadata: Metadata::new(),
        }
    }

    fn registered(id: &str, name: &str, at: DateTime<Utc>) -> ServiceRegistered {
        ServiceRegistered {
            identity: identity(id, name),
            registered_at: at,
            available_controls: Vec::new(),
        }
    }

    fn heartbeat(id: &str, at: DateTime<Utc>, state: &[(&str, StateValue)]) -> ServiceHeartbeat {
        ServiceHeartbeat {
            service_id: id.into(),
            service_name: "cnc-service".into(),
            machine_name: "bench".into(),
            timestamp: at,
            health_status: HealthStatus::Healthy,
            current_state: state
                .iter()
                .map(|(key, value)| ((*key).to_owned(), value.clone()))
                .collect(),
            uptime: Duration::from_secs(12),
            message_count: 3,
        }
    }

    fn change(id: &str, key: &str, value: StateValue) -> ServiceStateChanged {
        ServiceStateChanged {
            service_id: id.into(),
            service_name: "cnc-service".into(),
            machine_name: "bench".into(),
            timestamp: Utc::now(),
            state_key: key.into(),
            old_value: None,
            new_value: value,
            reason: None,
        }
    }

    #[test]
    fn new_record_starts_unknown_with_registration_time() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        let at = Utc::now();
        assert_eq!(
            registry.register(&registered("svc-1", "cnc", at)),
            RegistryEvent::Added("svc-1".into())
        );
        let record = registry.get("svc-1").expect("record");
        assert_eq!(record.health_status, HealthStatus::Unknown);
        assert_eq!(record.last_heartbeat, at);
        assert!(record.current_state.is_empty());
    }

    #[test]
    fn heartbeat_then_state_change_mirrors_latest_value() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        registry.register(&registered("svc-1", "cnc", Utc::now()));
        registry
            .record_heartbeat(&heartbeat("svc-1", Utc::now(), &[("x", StateValue::Number(1.0))]))
            .expect("heartbeat");
        registry
            .apply_state_change(&change("svc-1", "x", StateValue::Number(2.0)))
            .expect("state change");

        let record = registry.get("svc-1").expect("record");
        assert_eq!(record.current_state.len(), 1);
        assert_eq!(record.current_state.get("x"), Some(&StateValue::Number(2.0)));
        assert_eq!(record.health_status, HealthStatus::Healthy);
    }

    #[test]
    fn state_change_does_not_touch_last_heartbeat() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        let beat_at = Utc::now() - ChronoDuration::seconds(5);
        registry.register(&registered("svc-1", "cnc", beat_at));
        registry
            .record_heartbeat(&heartbeat("svc-1", beat_at, &[]))
            .expect("heartbeat");
        registry
            .apply_state_change(&change("svc-1", "y", StateValue::Bool(true)))
            .expect("state change");
        assert_eq!(registry.get("svc-1").expect("record").last_heartbeat, beat_at);
    }

    #[test]
    fn unknown_service_events_create_no_record() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        let beat = Message::new(MessagePayload::ServiceHeartbeat(heartbeat(
            "ghost",
            Utc::now(),
            &[],
        )));
        let state = Message::new(MessagePayload::ServiceStateChanged(change(
            "ghost",
            "x",
            StateValue::Number(1.0),
        )));
        assert!(!registry.apply(&beat));
        assert!(!registry.apply(&state));
        assert!(registry.is_empty());
        assert_eq!(
            registry.apply_state_change(&change("ghost", "x", StateValue::Number(1.0))),
            Err(RegistryError::UnknownService("ghost".into()))
        );
    }

    #[test]
    fn re_registration_keeps_runtime_fields() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        registry.register(&registered("svc-1", "cnc", Utc::now()));
        registry
            .record_heartbeat(&heartbeat("svc-1", Utc::now(), &[("x", StateValue::Number(1.0))]))
            .expect("heartbeat");

        let event = registry.register(&registered("svc-1", "cnc-renamed", Utc::now()));
        assert_eq!(event, RegistryEvent::Updated("svc-1".into()));
        let record = registry.get("svc-1").expect("record");
        assert_eq!(record.identity.service_name, "cnc-renamed");
        assert_eq!(record.health_status, HealthStatus::Healthy);
        assert_eq!(record.current_state.get("x"), Some(&StateValue::Number(1.0)));
    }

    #[test]
    fn online_threshold_is_strict() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        let beat_at = Utc::now();
        registry.register(&registered("svc-1", "cnc", beat_at));
        let record = registry.get("svc-1").expect("record");

        assert!(registry.is_online_at(&record, beat_at + ChronoDuration::seconds(29)));
        assert!(!registry.is_online_at(&record, beat_at + ChronoDuration::seconds(30)));
        assert!(registry.is_online_at(&record, beat_at - ChronoDuration::seconds(1)));
    }

    #[test]
    fn listeners_see_added_then_updated() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        let mut events = registry.subscribe();
        registry.register(&registered("svc-1", "cnc", Utc::now()));
        registry
            .record_heartbeat(&heartbeat("svc-1", Utc::now(), &[]))
            .expect("heartbeat");

        assert_eq!(events.try_recv().expect("added"), RegistryEvent::Added("svc-1".into()));
        assert_eq!(events.try_recv().expect("updated"), RegistryEvent::Updated("svc-1".into()));
    }

    #[test]
    fn gauges_track_known_and_online() {
        let prometheus = Registry::new();
        let metrics = RegistryMetrics::register(&prometheus).expect("metrics");
        let registry = ServiceRegistry::new(Duration::from_secs(30)).with_metrics(metrics);
        registry.register(&registered("svc-1", "cnc", Utc::now()));
        registry.register(&registered(
            "svc-2",
            "printer",
            Utc::now() - ChronoDuration::minutes(5),
        ));
        registry.refresh_gauges();

        let value = |name: &str| {
            prometheus
                .gather()
                .iter()
                .find(|f| f.get_name() == name)
                .map(|f| f.get_metric()[0].get_gauge().get_value())
        };
        assert_eq!(value("ecc_registry_known_services"), Some(2.0));
        assert_eq!(value("ecc_registry_online_services"), Some(1.0));
        assert_eq!(registry.online_services().len(), 1);
    }

    #[test]
    fn status_serializes_flat_with_online_flag() {
        let registry = ServiceRegistry::new(Duration::from_secs(30));
        registry.register(&registered("svc-1", "cnc", Utc::now()));
        let status = registry.status("svc-1").expect("status");
        let value = serde_json::to_value(&status).expect("json");
        assert_eq!(value["serviceId"], "svc-1");
        assert_eq!(value["healthStatus"], "Unknown");
        assert_eq!(value["online"], true);
        assert!(value.get("record").is_none());
    }
}
