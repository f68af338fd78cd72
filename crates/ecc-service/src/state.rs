//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Per-service state store. Every effective mutation produces exactly one
//! state-changed event, queued while the key's shard lock is held so events
//! for a key leave in write order.

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ecc_msg::{
    BusClient, MessagePayload, ServiceIdentity, ServiceState, ServiceStateChanged, StateValue,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capability handed to control handlers: read and mutate service state.
pub trait StateAccess: Send + Sync {
    /// Store `value` under `key`. Returns `false` when the value is unchanged.
    fn set_state(&self, key: &str, value: StateValue, reason: Option<&str>) -> bool;
    /// Copy of the current value.
    fn get(&self, key: &str) -> Option<StateValue>;
    /// Point-in-time copy of the whole state.
    fn snapshot(&self) -> ServiceState;
}

pub struct StateStore {
    identity: Arc<ServiceIdentity>,
    values: DashMap<String, StateValue>,
    outbox: mpsc::UnboundedSender<ServiceStateChanged>,
}

/// Receiving end of the change events produced by a [`StateStore`].
pub struct Outbox {
    receiver: mpsc::UnboundedReceiver<ServiceStateChanged>,
}

impl StateStore {
    pub fn new(identity: Arc<ServiceIdentity>) -> (Arc<Self>, Outbox) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let store = Arc::new(Self {
            identity,
            values: DashMap::new(),
            outbox: sender,
        });
        (store, Outbox { receiver })
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn emit(
        &self,
        key: &str,
        old_value: Option<StateValue>,
        new_value: StateValue,
        reason: Option<&str>,
    ) {
        let event = ServiceStateChanged {
            service_id: self.identity.service_id.clone(),
            service_name: self.identity.service_name.clone(),
            machine_name: self.identity.machine_name.clone(),
            timestamp: Utc::now(),
            state_key: key.to_owned(),
            old_value,
            new_value,
            reason: reason.map(str::to_owned),
        };
        if self.outbox.send(event).is_err() {
            debug!(
                service_id = %self.identity.service_id,
                key,
                "outbox closed; state change not published"
            );
        }
    }
}

impl StateAccess for StateStore {
    fn set_state(&self, key: &str, value: StateValue, reason: Option<&str>) -> bool {
        match self.values.entry(key.to_owned()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == value {
                    return false;
                }
                let old = entry.insert(value.clone());
                info!(service_id = %self.identity.service_id, key, value = %value, "state changed");
                self.emit(key, Some(old), value, reason);
            }
            Entry::Vacant(entry) => {
                entry.insert(value.clone());
                info!(
                    service_id = %self.identity.service_id,
                    key,
                    value = %value,
                    "state initialised"
                );
                self.emit(key, None, value, reason);
            }
        }
        true
    }

    fn get(&self, key: &str) -> Option<StateValue> {
        self.values.get(key).map(|value| value.clone())
    }

    fn snapshot(&self) -> ServiceState {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Outbox {
    /// Take the next queued event without waiting.
    pub fn try_next(&mut self) -> Option<ServiceStateChanged> {
        self.receiver.try_recv().ok()
    }

    /// Publish queued events in order until shutdown, then flush what is left.
    pub fn spawn(
        mut self,
        bus: BusClient,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = self.receiver.recv() => match event {
                        Some(event) => publish_change(&bus, event).await,
                        None => return,
                    },
                }
            }
            while let Some(event) = self.try_next() {
                publish_change(&bus, event).await;
            }
        })
    }
}

async fn publish_change(bus: &BusClient, event: ServiceStateChanged) {
    let key = event.state_key.clone();
    if let Err(err) = bus
        .publish(MessagePayload::ServiceStateChanged(event))
        .await
    {
        warn!(state_key = %key, error = %err, "state change could not be published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecc_msg::Metadata;

    fn identity() -> Arc<ServiceIdentity> {
        Arc::new(ServiceIdentity {
            service_id: "svc-1".into(),
            service_name: "cnc-service".into(),
            machine_name: "bench".into(),
            equipment_type: "CNC".into(),
            manufacturer: "Generic".into(),
            version: "1.0.0".into(),
            metadata: Metadata::new(),
        })
    }

    #[test]
    fn repeated_value_emits_once() {
        let (store, mut outbox) = StateStore::new(identity());
        assert!(store.set_state("x", StateValue::Number(1.0), None));
        assert!(!store.set_state("x", StateValue::Number(1.0), None));

        let event = outbox.try_next().expect("one event");
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value, StateValue::Number(1.0));
        assert!(outbox.try_next().is_none());
    }

    #[test]
    fn change_carries_old_and_new_values() {
        let (store, mut outbox) = StateStore::new(identity());
        store.set_state("spindle-speed", StateValue::Number(1000.0), Some("seed"));
        store.set_state("spindle-speed", StateValue::Number(1500.0), Some("User adjustment"));
        let _ = outbox.try_next();
        let change = outbox.try_next().expect("second event");
        assert_eq!(change.old_value, Some(StateValue::Number(1000.0)));
        assert_eq!(change.new_value, StateValue::Number(1500.0));
        assert_eq!(change.reason.as_deref(), Some("User adjustment"));
        assert_eq!(change.service_id, "svc-1");
    }

    #[test]
    fn snapshot_is_a_copy() {
        let (store, _outbox) = StateStore::new(identity());
        store.set_state("a", StateValue::Bool(true), None);
        let snapshot = store.snapshot();
        store.set_state("a", StateValue::Bool(false), None);
        assert_eq!(snapshot.get("a"), Some(&StateValue::Bool(true)));
        assert_eq!(store.get("a"), Some(StateValue::Bool(false)));
    }

    #[test]
    fn concurrent_writers_to_one_key_keep_event_order() {
        let (store, mut outbox) = StateStore::new(identity());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let value = StateValue::Number(f64::from(worker * 1000 + i));
                        store.set_state("counter", value, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        // Each event's old value must be the previous event's new value.
        let mut previous: Option<StateValue> = None;
        while let Some(event) = outbox.try_next() {
            assert_eq!(event.old_value, previous);
            previous = Some(event.new_value);
        }
        assert_eq!(previous, store.get("counter"));
    }
}
