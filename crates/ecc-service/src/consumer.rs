//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use ecc_msg::{
    BusClient, ControlCommand, ControlCommandResponse, ErrorCode, Inbox, Message, MessagePayload,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::executor::ControlExecutor;

/// Drains a service's command endpoint and replies to every command.
#[derive(Clone)]
pub struct CommandConsumer {
    service_id: String,
    executor: Arc<ControlExecutor>,
    bus: BusClient,
}

impl CommandConsumer {
    pub fn new(
        service_id: impl Into<String>,
        executor: Arc<ControlExecutor>,
        bus: BusClient,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            executor,
            bus,
        }
    }

    /// Run the executor for one command. Never panics: executor panics become
    /// `INTERNAL_ERROR` responses.
    pub fn handle(&self, command: &ControlCommand) -> ControlCommandResponse {
        let started = Instant::now();
        info!(
            command_id = %command.command_id,
            control_id = %command.control_id,
            "processing control command"
        );
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.executor.execute(&command.control_id, &command.value)
        }));
        match outcome {
            Ok(Ok(result)) => ControlCommandResponse::succeeded(command, result, started.elapsed()),
            Ok(Err(err)) => {
                warn!(command_id = %command.command_id, error = %err, "control command failed");
                let message = err.to_string();
                ControlCommandResponse::failed(command, err.code(), message, started.elapsed())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(
                    command_id = %command.command_id,
                    reason = %reason,
                    "control handler panicked"
                );
                ControlCommandResponse::failed(
                    command,
                    ErrorCode::InternalError,
                    format!("internal error: {reason}"),
                    started.elapsed(),
                )
            }
        }
    }

    /// Handle one inbound message and send the reply to its `replyTo` address.
    pub async fn process(&self, message: Message) {
        let reply_to = message.reply_to.clone();
        let command = match message.payload {
            MessagePayload::ControlCommand(command) => command,
            _ => {
                warn!(
                    service_id = %self.service_id,
                    kind = message.kind(),
                    "ignoring non-command message on command endpoint"
                );
                return;
            }
        };
        if command.service_id != self.service_id {
            warn!(
                service_id = %self.service_id,
                addressed_to = %command.service_id,
                command_id = %command.command_id,
                "command addressed to another service"
            );
        }

        let response = self.handle(&command);
        let Some(reply_to) = reply_to else {
            warn!(
                command_id = %command.command_id,
                "command has no reply address; response dropped"
            );
            return;
        };
        let reply = Message::new(MessagePayload::ControlCommandResponse(response));
        if let Err(err) = self.bus.send(&reply_to, &reply).await {
            warn!(
                command_id = %command.command_id,
                reply_to = %reply_to,
                error = %err,
                "failed to deliver command response"
            );
        }
    }

    pub fn spawn(self, mut inbox: Inbox, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    message = inbox.next() => match message {
                        Some(message) => self.process(message).await,
                        None => break,
                    },
                }
            }
            info!(service_id = %self.service_id, "command consumer stopped");
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ControlTable;
    use crate::state::StateStore;
    use ecc_msg::{
        ControlDefinition, ControlType, DeliveryGuarantee, InMemoryBus, Metadata, ServiceIdentity,
        StateValue, WireCodec,
    };

    fn consumer(bus: &InMemoryBus) -> CommandConsumer {
        let (state, _outbox) = StateStore::new(Arc::new(ServiceIdentity {
            service_id: "svc-1".into(),
            service_name: "svc".into(),
            machine_name: "bench".into(),
            equipment_type: "Test".into(),
            manufacturer: "Generic".into(),
            version: "1.0.0".into(),
            metadata: Metadata::new(),
        }));
        let table = ControlTable::new()
            .button(
                ControlDefinition::new("explode", "Explode", ControlType::Button, "Test"),
                |_| panic!("handler blew up"),
            )
            .and_then(|t| {
                t.toggle(
                    ControlDefinition::new("lamp", "Lamp", ControlType::Toggle, "Test"),
                    |state, on| {
                        state.set_state("lamp", StateValue::Bool(on), None);
                        "ok".into()
                    },
                )
            })
            .expect("table");
        let executor = Arc::new(ControlExecutor::new(table, state));
        let client = BusClient::new(
            Arc::new(bus.clone()),
            WireCodec::default(),
            DeliveryGuarantee::AtMostOnce,
        );
        CommandConsumer::new("svc-1", executor, client)
    }

    #[test]
    fn panics_become_internal_errors() {
        let bus = InMemoryBus::new();
        let consumer = consumer(&bus);
        let command = ControlCommand::new("svc-1", "explode", StateValue::Bool(true));
        let response = consumer.handle(&command);
        assert!(!response.success);
        assert_eq!(response.error_code, Some(ErrorCode::InternalError));
        assert!(response
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("handler blew up"));

        // the consumer keeps working afterwards
        let ok = consumer.handle(&ControlCommand::new("svc-1", "lamp", StateValue::Bool(true)));
        assert!(ok.success);
    }

    #[tokio::test]
    async fn reply_goes_to_requester_address() {
        let bus = InMemoryBus::new();
        let consumer = consumer(&bus);
        let client = BusClient::new(
            Arc::new(bus.clone()),
            WireCodec::default(),
            DeliveryGuarantee::AtMostOnce,
        );
        let mut replies = client.bind("client.a").expect("bind");

        let command = ControlCommand::new("svc-1", "nope", StateValue::Bool(true));
        consumer
            .process(
                Message::new(MessagePayload::ControlCommand(command.clone()))
                    .with_reply_to("client.a"),
            )
            .await;

        let reply = replies.next().await.expect("reply");
        let MessagePayload::ControlCommandResponse(response) = reply.payload else {
            panic!("expected response");
        };
        assert_eq!(response.command_id, command.command_id);
        assert_eq!(response.error_code, Some(ErrorCode::UnknownControl));
    }
}
