//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Bus tracing and Prometheus counters."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use tracing::{debug, trace};

use crate::types::Message;

/// Where a message crossed the bus boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop<'a> {
    /// Broadcast to every consumer group.
    Published,
    /// Point-to-point send to an endpoint.
    Sent(&'a str),
    /// Decoded from a group or endpoint queue.
    Received(&'a str),
}

impl Hop<'_> {
    fn direction(&self) -> &'static str {
        match self {
            Hop::Published | Hop::Sent(_) => "out",
            Hop::Received(_) => "in",
        }
    }
}

/// Trace one message crossing the bus. First attempts log at trace level,
/// retried deliveries at debug so they stand out.
pub fn trace_hop(hop: Hop<'_>, attempt: u32, message: &Message) {
    let address = match hop {
        Hop::Published => "*",
        Hop::Sent(address) | Hop::Received(address) => address,
    };
    if attempt > 1 {
        debug!(
            message_id = %message.id,
            kind = message.kind(),
            service_id = message.payload.service_id(),
            address,
            attempt,
            "bus delivery succeeded after retry"
        );
    } else {
        trace!(
            message_id = %message.id,
            kind = message.kind(),
            service_id = message.payload.service_id(),
            address,
            direction = hop.direction(),
            "bus hop"
        );
    }
}

/// Why a frame never reached a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Every delivery attempt failed.
    Delivery,
    /// The frame could not be decoded.
    Decode,
}

impl DropReason {
    fn label(self) -> &'static str {
        match self {
            DropReason::Delivery => "delivery",
            DropReason::Decode => "decode",
        }
    }
}

/// Prometheus handles shared by every `BusClient` of one daemon.
pub struct BusMetrics {
    messages: IntCounterVec,
    retries: IntCounterVec,
    dropped: IntCounterVec,
    command_round_trip: Histogram,
}

impl BusMetrics {
    /// Register bus metrics with `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let messages = IntCounterVec::new(
            Opts::new("ecc_bus_messages_total", "Messages crossing the bus"),
            &["kind", "direction"],
        )?;
        let retries = IntCounterVec::new(
            Opts::new(
                "ecc_bus_retries_total",
                "Delivery attempts beyond the first, by message kind",
            ),
            &["kind"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new(
                "ecc_bus_dropped_total",
                "Frames that never reached a handler",
            ),
            &["reason"],
        )?;
        let command_round_trip = Histogram::with_opts(
            HistogramOpts::new(
                "ecc_command_round_trip_seconds",
                "Time from sending a control command to receiving its response",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(command_round_trip.clone()))?;

        Ok(Self {
            messages,
            retries,
            dropped,
            command_round_trip,
        })
    }

    /// Count a delivered or decoded message; retried deliveries also count
    /// their extra attempts.
    pub fn observe_hop(&self, hop: Hop<'_>, attempt: u32, kind: &str) {
        self.messages
            .with_label_values(&[kind, hop.direction()])
            .inc();
        if attempt > 1 {
            self.retries
                .with_label_values(&[kind])
                .inc_by(u64::from(attempt - 1));
        }
    }

    /// Count a frame lost for `reason`.
    pub fn observe_dropped(&self, reason: DropReason) {
        self.dropped.with_label_values(&[reason.label()]).inc();
    }

    /// Record a completed command round trip.
    pub fn observe_round_trip(&self, elapsed: Duration) {
        self.command_round_trip.observe(elapsed.as_secs_f64());
    }
}
