//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Event and command schema for equipment services, the wire codec, and the
//! in-process bus they travel on.

pub mod bus;
pub mod codec;
pub mod qos;
pub mod telemetry;
pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised while encoding, decoding or delivering messages.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// JSON serialization or deserialization problem.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// CBOR serialization or deserialization problem.
    #[error("cbor error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// Envelope produced by a newer schema than this build understands.
    #[error("unsupported schema version {0}")]
    UnsupportedSchema(u16),
    /// Transport refused the frame.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// Another consumer already drains the queue.
    #[error("queue '{0}' already has a consumer")]
    AlreadyBound(String),
    /// All delivery attempts failed.
    #[error("delivery failed after {attempts} attempt(s): {reason}")]
    DeliveryFailed {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error reported by the last attempt.
        reason: String,
    },
}

pub use bus::{BusClient, Inbox, MessagingMetrics};
pub use codec::WireCodec;
pub use qos::DeliveryGuarantee;
pub use telemetry::{trace_hop, BusMetrics, DropReason, Hop};
pub use transport::{InMemoryBus, Subscription, Transport};
pub use types::{
    service_endpoint, ControlCommand, ControlCommandResponse, ControlConstraints,
    ControlDefinition, ControlType, ErrorCode, HealthStatus, Message, MessagePayload, Metadata,
    ServiceHeartbeat, ServiceIdentity, ServiceRegistered, ServiceState, ServiceStateChanged,
    StateValue,
};
