//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ecc_msg::{
    BusClient, ControlDefinition, Message, MessagePayload, MessagingError, ServiceIdentity,
    ServiceRegistered, StateValue,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::StateAccess;

/// Write the profile's initial state, then the value hint of every control
/// whose key is still unset.
pub fn seed_state(
    state: &dyn StateAccess,
    initial: &[(String, StateValue)],
    controls: &[ControlDefinition],
) {
    for (key, value) in initial {
        state.set_state(key, value.clone(), Some("Initial state"));
    }
    for control in controls {
        let Some(hint) = &control.current_value else {
            continue;
        };
        if state.get(&control.control_id).is_none() {
            state.set_state(&control.control_id, hint.clone(), Some("Initial value"));
        }
    }
}

/// Announces the service once, after a short startup delay.
pub struct RegistrationPublisher {
    identity: Arc<ServiceIdentity>,
    controls: Vec<ControlDefinition>,
    bus: BusClient,
    delay: Duration,
}

impl RegistrationPublisher {
    pub fn new(
        identity: Arc<ServiceIdentity>,
        controls: Vec<ControlDefinition>,
        bus: BusClient,
        delay: Duration,
    ) -> Self {
        Self {
            identity,
            controls,
            bus,
            delay,
        }
    }

    pub fn registration(&self) -> ServiceRegistered {
        ServiceRegistered {
            identity: (*self.identity).clone(),
            registered_at: Utc::now(),
            available_controls: self.controls.clone(),
        }
    }

    /// Publish the registration with the bus retry policy.
    pub async fn publish(&self) -> Result<Message, MessagingError> {
        let message = self
            .bus
            .publish(MessagePayload::ServiceRegistered(self.registration()))
            .await?;
        info!(
            service_id = %self.identity.service_id,
            controls = self.controls.len(),
            "service registration published"
        );
        Ok(message)
    }

    /// Wait for the delay, publish once, and exit. Failure is logged only.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(self.delay) => {}
            }
            if let Err(err) = self.publish().await {
                warn!(
                    service_id = %self.identity.service_id,
                    error = %err,
                    "service registration failed"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use ecc_msg::{
        ControlType, DeliveryGuarantee, InMemoryBus, Metadata, WireCodec,
    };

    fn identity() -> Arc<ServiceIdentity> {
        Arc::new(ServiceIdentity {
            service_id: "cnc-01".into(),
            service_name: "cnc-service".into(),
            machine_name: "bench".into(),
            equipment_type: "CNC".into(),
            manufacturer: "Generic".into(),
            version: "1.0.0".into(),
            metadata: Metadata::new(),
        })
    }

    #[test]
    fn seeding_prefers_initial_state_over_hints() {
        let (state, mut outbox) = StateStore::new(identity());
        let controls = vec![
            ControlDefinition::new("bed-temperature", "Bed", ControlType::Slider, "T")
                .with_current_value(60.0),
            ControlDefinition::new("coolant-toggle", "Coolant", ControlType::Toggle, "M")
                .with_current_value(false),
            ControlDefinition::new("start", "Start", ControlType::Button, "M"),
        ];
        seed_state(
            state.as_ref(),
            &[("bed-temperature".into(), StateValue::Number(0.0))],
            &controls,
        );
        assert_eq!(state.get("bed-temperature"), Some(StateValue::Number(0.0)));
        assert_eq!(state.get("coolant-toggle"), Some(StateValue::Bool(false)));
        assert_eq!(state.get("start"), None);

        let mut events = 0;
        while outbox.try_next().is_some() {
            events += 1;
        }
        assert_eq!(events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn registration_waits_for_delay() {
        let bus = InMemoryBus::new();
        let client = BusClient::new(
            Arc::new(bus.clone()),
            WireCodec::default(),
            DeliveryGuarantee::AtMostOnce,
        );
        let mut inbox = client.subscribe("aggregator").expect("subscribe");
        let (_tx, rx) = broadcast::channel(1);
        let delay = Duration::from_secs(2);
        let publisher = RegistrationPublisher::new(identity(), Vec::new(), client.clone(), delay);
        let task = publisher.spawn(rx);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(inbox.try_next().is_none());
        task.await.expect("registration task");
        let message = inbox.try_next().expect("registration published");
        assert_eq!(message.kind(), "service_registered");
    }
}
