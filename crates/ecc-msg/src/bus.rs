//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::codec::WireCodec;
use crate::telemetry::{trace_hop, BusMetrics, DropReason, Hop};
use crate::qos::DeliveryGuarantee;
use crate::transport::{Subscription, Transport};
use crate::types::{Message, MessagePayload};
use crate::{MessagingError, Result};

/// Snapshot of messaging metrics used by dashboards and monitoring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessagingMetrics {
    /// Number of messages accepted by the transport.
    pub sent: u64,
    /// Number of messages decoded from queues.
    pub received: u64,
    /// Number of messages that exhausted their retries or failed to decode.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    failures_since_check: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MessagingMetrics {
        MessagingMetrics {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

enum Route<'a> {
    Broadcast,
    Endpoint(&'a str),
}

impl<'a> Route<'a> {
    fn hop(&self) -> Hop<'a> {
        match self {
            Route::Broadcast => Hop::Published,
            Route::Endpoint(address) => Hop::Sent(*address),
        }
    }
}

/// A component's handle on the bus: encodes, applies the retry policy, and
/// keeps delivery counters.
#[derive(Clone)]
pub struct BusClient {
    transport: Arc<dyn Transport>,
    codec: WireCodec,
    guarantee: DeliveryGuarantee,
    counters: Arc<Counters>,
    exporter: Option<Arc<BusMetrics>>,
}

impl BusClient {
    /// Construct a client over `transport` with the default delivery guarantee.
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: WireCodec,
        guarantee: DeliveryGuarantee,
    ) -> Self {
        Self {
            transport,
            codec,
            guarantee,
            counters: Arc::new(Counters::default()),
            exporter: None,
        }
    }

    /// Mirror counters into Prometheus.
    pub fn with_metrics(mut self, exporter: Arc<BusMetrics>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Same transport, codec, policy and exporter with independent counters.
    pub fn fork(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: self.codec,
            guarantee: self.guarantee,
            counters: Arc::new(Counters::default()),
            exporter: self.exporter.clone(),
        }
    }

    /// Default delivery guarantee.
    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.guarantee
    }

    /// Prometheus exporter, when attached.
    pub fn exporter(&self) -> Option<&Arc<BusMetrics>> {
        self.exporter.as_ref()
    }

    /// Broadcast a payload to every consumer group.
    pub async fn publish(&self, payload: MessagePayload) -> Result<Message> {
        self.publish_with(payload, self.guarantee).await
    }

    /// Broadcast a payload with an explicit delivery guarantee.
    pub async fn publish_with(
        &self,
        payload: MessagePayload,
        guarantee: DeliveryGuarantee,
    ) -> Result<Message> {
        let message = Message::new(payload);
        self.deliver(&message, Route::Broadcast, guarantee).await?;
        Ok(message)
    }

    /// Send a message to a single endpoint.
    pub async fn send(&self, address: &str, message: &Message) -> Result<()> {
        self.deliver(message, Route::Endpoint(address), self.guarantee)
            .await
    }

    /// Attach to a consumer group's durable queue.
    pub fn subscribe(&self, group: &str) -> Result<Inbox> {
        Ok(self.inbox(self.transport.subscribe(group)?))
    }

    /// Attach to an endpoint's durable queue.
    pub fn bind(&self, address: &str) -> Result<Inbox> {
        Ok(self.inbox(self.transport.bind(address)?))
    }

    /// Current counters.
    pub fn metrics(&self) -> MessagingMetrics {
        self.counters.snapshot()
    }

    /// Delivery failures since the previous call.
    pub fn take_failures(&self) -> u64 {
        self.counters.failures_since_check.swap(0, Ordering::Relaxed)
    }

    fn inbox(&self, subscription: Subscription) -> Inbox {
        Inbox {
            subscription,
            codec: self.codec,
            counters: Arc::clone(&self.counters),
            exporter: self.exporter.clone(),
        }
    }

    async fn deliver(
        &self,
        message: &Message,
        route: Route<'_>,
        guarantee: DeliveryGuarantee,
    ) -> Result<()> {
        let frame = self.codec.encode(message)?;
        let mut attempt = 1u32;
        loop {
            match self.attempt(&route, frame.clone()) {
                Ok(()) => {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    let hop = route.hop();
                    if let Some(exporter) = &self.exporter {
                        exporter.observe_hop(hop, attempt, message.kind());
                    }
                    trace_hop(hop, attempt, message);
                    return Ok(());
                }
                Err(err) => match guarantee.backoff(attempt) {
                    Some(delay) => {
                        warn!(
                            transport = self.transport.name(),
                            kind = message.kind(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "bus delivery failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        self.counters
                            .failures_since_check
                            .fetch_add(1, Ordering::Relaxed);
                        if let Some(exporter) = &self.exporter {
                            exporter.observe_dropped(DropReason::Delivery);
                        }
                        warn!(
                            transport = self.transport.name(),
                            kind = message.kind(),
                            attempts = attempt,
                            error = %err,
                            "bus delivery failed"
                        );
                        return Err(MessagingError::DeliveryFailed {
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }
    }

    fn attempt(&self, route: &Route<'_>, frame: Bytes) -> Result<()> {
        match route {
            Route::Broadcast => self.transport.publish(frame).map(|_| ()),
            Route::Endpoint(address) => self.transport.send(address, frame),
        }
    }
}

/// Decoding consumer over a durable queue.
pub struct Inbox {
    subscription: Subscription,
    codec: WireCodec,
    counters: Arc<Counters>,
    exporter: Option<Arc<BusMetrics>>,
}

impl Inbox {
    /// Group name or endpoint address drained by this inbox.
    pub fn address(&self) -> &str {
        self.subscription.address()
    }

    /// Wait for the next decodable message. Undecodable frames are logged and skipped.
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            let frame = self.subscription.recv().await?;
            if let Some(message) = self.accept(&frame) {
                return Some(message);
            }
        }
    }

    /// Take the next decodable message if one is already queued.
    pub fn try_next(&mut self) -> Option<Message> {
        loop {
            let frame = self.subscription.try_recv()?;
            if let Some(message) = self.accept(&frame) {
                return Some(message);
            }
        }
    }

    fn accept(&self, frame: &[u8]) -> Option<Message> {
        match self.codec.decode(frame) {
            Ok(message) => {
                self.counters.received.fetch_add(1, Ordering::Relaxed);
                let hop = Hop::Received(self.address());
                if let Some(exporter) = &self.exporter {
                    exporter.observe_hop(hop, 1, message.kind());
                }
                trace_hop(hop, 1, &message);
                Some(message)
            }
            Err(err) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(exporter) = &self.exporter {
                    exporter.observe_dropped(DropReason::Decode);
                }
                warn!(address = self.address(), error = %err, "discarding undecodable frame");
                None
            }
        }
    }
}
