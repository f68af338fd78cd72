//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Bus transports. Broadcast frames fan out to one durable queue per consumer
//! group; point-to-point frames land in a durable queue per endpoint address.
//! Queues outlive their subscribers, so frames sent while nobody is attached
//! are delivered to the next subscriber.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{MessagingError, Result};

/// Transport abstraction used by all messaging backends.
pub trait Transport: Send + Sync {
    /// Deliver a frame to every consumer group. Returns the number of groups reached.
    fn publish(&self, frame: Bytes) -> Result<usize>;
    /// Deliver a frame to a single endpoint queue.
    fn send(&self, address: &str, frame: Bytes) -> Result<()>;
    /// Attach to the durable queue of a consumer group.
    fn subscribe(&self, group: &str) -> Result<Subscription>;
    /// Attach to the durable queue of a point-to-point endpoint.
    fn bind(&self, address: &str) -> Result<Subscription>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

struct Queue {
    sender: mpsc::UnboundedSender<Bytes>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl Queue {
    fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    fn push(&self, frame: Bytes) -> Result<()> {
        self.sender
            .send(frame)
            .map_err(|_| MessagingError::Unavailable("queue closed".into()))
    }
}

/// Exclusive consumer handle on a durable queue. Dropping it detaches the
/// consumer and leaves undelivered frames in the queue.
pub struct Subscription {
    address: String,
    queue: Arc<Queue>,
    receiver: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl Subscription {
    /// Group name or endpoint address this subscription drains.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait for the next frame.
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }

    /// Take the next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.as_mut()?.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self.queue.receiver.lock() = Some(receiver);
        }
    }
}

#[derive(Default)]
struct BusState {
    groups: DashMap<String, Arc<Queue>>,
    endpoints: DashMap<String, Arc<Queue>>,
    offline: AtomicBool,
    failures_pending: AtomicU32,
}

/// In-process bus with durable per-group and per-endpoint queues.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<BusState>,
}

impl InMemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish and send while `offline` is set.
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject the next `count` publish or send calls.
    pub fn fail_next(&self, count: u32) {
        self.state.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of consumer groups currently declared.
    pub fn group_count(&self) -> usize {
        self.state.groups.len()
    }

    fn check_available(&self) -> Result<()> {
        if self.state.offline.load(Ordering::SeqCst) {
            return Err(MessagingError::Unavailable("bus offline".into()));
        }
        let injected = self
            .state
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MessagingError::Unavailable("injected fault".into()));
        }
        Ok(())
    }

    fn attach(map: &DashMap<String, Arc<Queue>>, address: &str) -> Result<Subscription> {
        let queue = map
            .entry(address.to_owned())
            .or_insert_with(Queue::new)
            .clone();
        let receiver = queue
            .receiver
            .lock()
            .take()
            .ok_or_else(|| MessagingError::AlreadyBound(address.to_owned()))?;
        Ok(Subscription {
            address: address.to_owned(),
            queue,
            receiver: Some(receiver),
        })
    }
}

impl Transport for InMemoryBus {
    fn publish(&self, frame: Bytes) -> Result<usize> {
        self.check_available()?;
        let mut delivered = 0;
        for group in self.state.groups.iter() {
            group.value().push(frame.clone())?;
            delivered += 1;
        }
        Ok(delivered)
    }

    fn send(&self, address: &str, frame: Bytes) -> Result<()> {
        self.check_available()?;
        let queue = self
            .state
            .endpoints
            .entry(address.to_owned())
            .or_insert_with(Queue::new)
            .clone();
        queue.push(frame)
    }

    fn subscribe(&self, group: &str) -> Result<Subscription> {
        Self::attach(&self.state.groups, group)
    }

    fn bind(&self, address: &str) -> Result<Subscription> {
        Self::attach(&self.state.endpoints, address)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
