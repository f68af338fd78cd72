//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use bytes::Bytes;
use ecc_common::config::WireFormat;

use crate::types::{Message, SCHEMA_VERSION};
use crate::{MessagingError, Result};

/// Encodes envelopes into frames and back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireCodec {
    format: WireFormat,
}

impl WireCodec {
    /// Codec for the given wire format.
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// Configured wire format.
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode a message into a frame.
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let frame = match self.format {
            WireFormat::Json => serde_json::to_vec(message)?,
            WireFormat::Cbor => serde_cbor::to_vec(message)?,
        };
        Ok(Bytes::from(frame))
    }

    /// Decode a frame, rejecting envelopes from a newer schema.
    pub fn decode(&self, frame: &[u8]) -> Result<Message> {
        let message: Message = match self.format {
            WireFormat::Json => serde_json::from_slice(frame)?,
            WireFormat::Cbor => serde_cbor::from_slice(frame)?,
        };
        if message.schema_version > SCHEMA_VERSION {
            return Err(MessagingError::UnsupportedSchema(message.schema_version));
        }
        Ok(message)
    }
}
