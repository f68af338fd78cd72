//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::time::Duration;

use ecc_common::config::BusConfig;

/// Delivery guarantees supported by the messaging subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryGuarantee {
    /// Single attempt; failures are reported but never retried.
    AtMostOnce,
    /// Retry with an incremental backoff until the transport accepts the frame.
    AtLeastOnce {
        /// Retries after the first attempt.
        max_retries: u8,
        /// Wait before the first retry.
        retry_interval: Duration,
        /// Added to the wait for each further retry.
        retry_increment: Duration,
    },
}

impl DeliveryGuarantee {
    /// Retry policy described by the bus configuration.
    pub fn from_config(config: &BusConfig) -> Self {
        DeliveryGuarantee::AtLeastOnce {
            max_retries: config.max_retries,
            retry_interval: config.retry_interval,
            retry_increment: config.retry_increment,
        }
    }

    /// Total number of attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            DeliveryGuarantee::AtMostOnce => 1,
            DeliveryGuarantee::AtLeastOnce { max_retries, .. } => u32::from(*max_retries) + 1,
        }
    }

    /// Wait before retry number `retry` (1-based), `None` when retries are exhausted.
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        match self {
            DeliveryGuarantee::AtMostOnce => None,
            DeliveryGuarantee::AtLeastOnce {
                max_retries,
                retry_interval,
                retry_increment,
            } => {
                if retry == 0 || retry > u32::from(*max_retries) {
                    return None;
                }
                Some(*retry_interval + retry_increment.saturating_mul(retry - 1))
            }
        }
    }
}

impl Default for DeliveryGuarantee {
    fn default() -> Self {
        Self::from_config(&BusConfig::default())
    }
}
