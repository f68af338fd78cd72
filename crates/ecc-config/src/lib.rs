//! ---
//! ecc_section: "03-configuration-management"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Runtime key/value configuration for equipment services."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Runtime key/value configuration consulted by equipment services. Values
//! live in an external store (Consul KV in deployments, memory in tests and
//! single-process runs) and are read through a per-service provider that
//! namespaces keys and degrades to compiled defaults.

use std::sync::Arc;

use async_trait::async_trait;
use ecc_common::config::{ConfigStoreBackend, ConfigStoreConfig};

pub mod consul;
pub mod memory;
pub mod provider;

pub use consul::ConsulKvStore;
pub use memory::MemoryConfigStore;
pub use provider::{
    ServiceConfigProvider, ServiceSettings, SettingsUpdate, DISPLAY_MESSAGE_KEY,
    POLLING_INTERVAL_KEY,
};

/// Shared result type for configuration store operations.
pub type Result<T> = std::result::Result<T, ConfigStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("config store unavailable: {0}")]
    Unavailable(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for key '{key}'")]
    Status { key: String, status: u16 },
}

/// Minimal get/set contract every backend implements.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current value of `key`; `None` when the key is absent or empty.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Write `value` under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Build the configured backend, seeding the memory store from configuration.
pub fn build_store(config: &ConfigStoreConfig) -> Result<Arc<dyn ConfigStore>> {
    match config.backend {
        ConfigStoreBackend::Memory => Ok(Arc::new(MemoryConfigStore::with_values(
            config
                .seed
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        ))),
        ConfigStoreBackend::Consul => Ok(Arc::new(ConsulKvStore::new(
            &config.consul_address,
            config.request_timeout,
        )?)),
    }
}
