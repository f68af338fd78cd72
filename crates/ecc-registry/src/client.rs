//! ---
//! ecc_section: "05-registry-and-commands"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Registry mirror and command dispatch."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Request/response over the bus. Each command gets a pending slot keyed by
//! its command id; a pump task drains the client's reply endpoint and
//! completes the matching slot. Slots are removed on reply, timeout, send
//! failure, and when the caller stops waiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ecc_msg::{
    service_endpoint, BusClient, ControlCommand, ControlCommandResponse, Inbox, Message,
    MessagePayload, MessagingError, StateValue,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{CommandOutcome, RegistryMetrics};

type PendingMap = DashMap<String, oneshot::Sender<ControlCommandResponse>>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("no response from '{service_id}' for '{control_id}' within {timeout:?}")]
    Timeout {
        service_id: String,
        control_id: String,
        timeout: Duration,
    },
    #[error("command could not be delivered: {0}")]
    DeliveryFailed(#[source] MessagingError),
    #[error("reply endpoint unavailable: {0}")]
    Endpoint(#[source] MessagingError),
    #[error("response pump stopped before a reply arrived")]
    Closed,
}

/// Removes its slot from the pending map when dropped.
struct PendingSlot<'a> {
    pending: &'a PendingMap,
    command_id: String,
}

impl<'a> PendingSlot<'a> {
    fn insert(
        pending: &'a PendingMap,
        command_id: String,
        sender: oneshot::Sender<ControlCommandResponse>,
    ) -> Self {
        pending.insert(command_id.clone(), sender);
        Self {
            pending,
            command_id,
        }
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.command_id);
    }
}

pub struct CommandClient {
    bus: BusClient,
    reply_to: String,
    pending: Arc<PendingMap>,
    default_timeout: Duration,
    requested_by: Option<String>,
    metrics: Option<RegistryMetrics>,
    pump: JoinHandle<()>,
}

impl CommandClient {
    /// Bind the reply endpoint and start the response pump.
    pub fn start(
        bus: BusClient,
        reply_to: impl Into<String>,
        default_timeout: Duration,
    ) -> Result<Self, CommandError> {
        let reply_to = reply_to.into();
        let inbox = bus.bind(&reply_to).map_err(CommandError::Endpoint)?;
        let pending = Arc::new(PendingMap::new());
        let pump = tokio::spawn(pump_responses(inbox, Arc::clone(&pending)));
        info!(reply_to = %reply_to, "command client ready");
        Ok(Self {
            bus,
            reply_to,
            pending,
            default_timeout,
            requested_by: None,
            metrics: None,
            pump,
        })
    }

    pub fn with_requested_by(mut self, requester: impl Into<String>) -> Self {
        self.requested_by = Some(requester.into());
        self
    }

    pub fn with_metrics(mut self, metrics: RegistryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Commands still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send a command and wait for its response. A failed execution is still
    /// an `Ok` response with `success == false`.
    pub async fn send_command(
        &self,
        service_id: &str,
        control_id: &str,
        value: StateValue,
        timeout: Option<Duration>,
    ) -> Result<ControlCommandResponse, CommandError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut command = ControlCommand::new(service_id, control_id, value);
        command.requested_by = self.requested_by.clone();
        let command_id = command.command_id.clone();

        let (sender, receiver) = oneshot::channel();
        let _slot = PendingSlot::insert(&self.pending, command_id.clone(), sender);
        let message = Message::new(MessagePayload::ControlCommand(command))
            .with_reply_to(self.reply_to.clone());
        let started = Instant::now();

        if let Err(err) = self.bus.send(&service_endpoint(service_id), &message).await {
            warn!(
                command_id = %command_id,
                service_id,
                control_id,
                error = %err,
                "command delivery failed"
            );
            self.observe(CommandOutcome::Undelivered);
            return Err(CommandError::DeliveryFailed(err));
        }
        debug!(command_id = %command_id, service_id, control_id, "command sent");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => {
                if let Some(exporter) = self.bus.exporter() {
                    exporter.observe_round_trip(started.elapsed());
                }
                self.observe(if response.success {
                    CommandOutcome::Succeeded
                } else {
                    CommandOutcome::Failed
                });
                Ok(response)
            }
            Ok(Err(_)) => Err(CommandError::Closed),
            Err(_) => {
                warn!(
                    command_id = %command_id,
                    service_id,
                    control_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "command timed out"
                );
                self.observe(CommandOutcome::TimedOut);
                Err(CommandError::Timeout {
                    service_id: service_id.to_owned(),
                    control_id: control_id.to_owned(),
                    timeout,
                })
            }
        }
    }

    fn observe(&self, outcome: CommandOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_command(outcome);
        }
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_responses(mut inbox: Inbox, pending: Arc<PendingMap>) {
    while let Some(message) = inbox.next().await {
        let kind = message.kind();
        let MessagePayload::ControlCommandResponse(response) = message.payload else {
            warn!(kind, "unexpected message on reply endpoint");
            continue;
        };
        match pending.remove(&response.command_id) {
            Some((_, slot)) => {
                if slot.send(response).is_err() {
                    debug!("caller stopped waiting before the reply arrived");
                }
            }
            None => debug!(command_id = %response.command_id, "late or unknown response dropped"),
        }
    }
}
