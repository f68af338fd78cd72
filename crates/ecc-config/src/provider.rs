//! ---
//! ecc_section: "03-configuration-management"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Runtime key/value configuration for equipment services."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ecc_common::config::ConfigStoreConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ConfigStore, ConfigStoreError, Result};

pub const DISPLAY_MESSAGE_KEY: &str = "display-message";
pub const POLLING_INTERVAL_KEY: &str = "polling-interval";

/// Store access scoped to one service: keys live under `<serviceName>/config/`.
#[derive(Clone)]
pub struct ServiceConfigProvider {
    store: Arc<dyn ConfigStore>,
    service_name: String,
    max_attempts: u8,
    backoff: Duration,
}

impl ServiceConfigProvider {
    pub fn new(store: Arc<dyn ConfigStore>, service_name: impl Into<String>) -> Self {
        let defaults = ConfigStoreConfig::default();
        Self {
            store,
            service_name: service_name.into(),
            max_attempts: defaults.max_attempts,
            backoff: defaults.retry_backoff,
        }
    }

    /// Apply the retry settings from configuration.
    pub fn with_retry(mut self, config: &ConfigStoreConfig) -> Self {
        self.max_attempts = config.max_attempts.max(1);
        self.backoff = config.retry_backoff;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Fully qualified store key for `key`.
    pub fn qualified_key(&self, key: &str) -> String {
        format!("{}/config/{}", self.service_name, key)
    }

    /// Read `key`, retrying transient failures. Exhaustion yields `Unavailable`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let qualified = self.qualified_key(key);
        let mut attempt = 1u8;
        loop {
            match self.store.get(&qualified).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    debug!(key = %qualified, attempt, error = %err, "config read failed; retrying");
                    tokio::time::sleep(self.backoff * u32::from(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ConfigStoreError::Unavailable(format!(
                        "{} after {} attempt(s): {}",
                        qualified, attempt, err
                    )))
                }
            }
        }
    }

    /// Write `key`, retrying transient failures.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let qualified = self.qualified_key(key);
        let mut attempt = 1u8;
        loop {
            match self.store.set(&qualified, value).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_attempts => {
                    debug!(
                        key = %qualified,
                        attempt,
                        error = %err,
                        "config write failed; retrying"
                    );
                    tokio::time::sleep(self.backoff * u32::from(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(ConfigStoreError::Unavailable(format!(
                        "{} after {} attempt(s): {}",
                        qualified, attempt, err
                    )))
                }
            }
        }
    }

    /// Parsed value of `key`, or `default` when absent, unreadable, or malformed.
    pub async fn get_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key).await {
            Ok(Some(raw)) => match raw.trim().parse::<T>() {
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        service = %self.service_name,
                        key,
                        value = %raw,
                        error = %err,
                        "malformed config value; using default"
                    );
                    default
                }
            },
            Ok(None) => default,
            Err(err) => {
                warn!(
                    service = %self.service_name,
                    key,
                    error = %err,
                    "config store unavailable; using default"
                );
                default
            }
        }
    }

    /// Millisecond duration stored under `key`, or `default`.
    pub async fn get_duration_ms(&self, key: &str, default: Duration) -> Duration {
        let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.get_or(key, fallback).await)
    }

    /// Operator-facing settings shown on the management surface.
    pub async fn settings(&self) -> Result<ServiceSettings> {
        let display_message = self.get(DISPLAY_MESSAGE_KEY).await?;
        let polling_interval = match self.get(POLLING_INTERVAL_KEY).await? {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(
                        service = %self.service_name,
                        value = %raw,
                        error = %err,
                        "ignoring malformed polling interval"
                    );
                    None
                }
            },
            None => None,
        };
        Ok(ServiceSettings {
            display_message,
            polling_interval,
        })
    }

    /// Write the fields present in `update`; absent or empty fields are left untouched.
    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<()> {
        if let Some(message) = update.display_message.as_deref().filter(|m| !m.is_empty()) {
            self.set(DISPLAY_MESSAGE_KEY, message).await?;
        }
        if let Some(interval) = update.polling_interval {
            self.set(POLLING_INTERVAL_KEY, &interval.to_string()).await?;
        }
        Ok(())
    }
}

/// Current operator settings of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    pub display_message: Option<String>,
    /// Milliseconds.
    pub polling_interval: Option<u64>,
}

/// Partial update of [`ServiceSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default)]
    pub display_message: Option<String>,
    #[serde(default)]
    pub polling_interval: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryConfigStore;

    fn provider(store: Arc<MemoryConfigStore>) -> ServiceConfigProvider {
        ServiceConfigProvider::new(store, "cnc-service").with_retry(&ConfigStoreConfig {
            max_attempts: 2,
            retry_backoff: Duration::from_millis(1),
            ..ConfigStoreConfig::default()
        })
    }

    #[tokio::test]
    async fn keys_are_namespaced_by_service() {
        let store = Arc::new(MemoryConfigStore::new());
        let provider = provider(store.clone());
        provider.set("polling-interval", "2500").await.expect("set");
        assert_eq!(
            store
                .get("cnc-service/config/polling-interval")
                .await
                .expect("get")
                .as_deref(),
            Some("2500")
        );
        assert_eq!(
            provider
                .get_duration_ms("polling-interval", Duration::from_secs(5))
                .await,
            Duration::from_millis(2500)
        );
    }

    #[tokio::test]
    async fn unavailable_store_falls_back_to_default() {
        let store = Arc::new(MemoryConfigStore::new());
        store.set_offline(true);
        let provider = provider(store);
        assert!(matches!(
            provider.get("polling-interval").await,
            Err(ConfigStoreError::Unavailable(_))
        ));
        assert_eq!(
            provider
                .get_duration_ms("polling-interval", Duration::from_secs(5))
                .await,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn malformed_values_fall_back_to_default() {
        let store = Arc::new(MemoryConfigStore::new());
        let provider = provider(store);
        provider.set("polling-interval", "soon").await.expect("set");
        assert_eq!(provider.get_or("polling-interval", 42u64).await, 42);
    }

    #[tokio::test]
    async fn settings_update_only_touches_present_fields() {
        let store = Arc::new(MemoryConfigStore::new());
        let provider = provider(store);
        provider
            .update_settings(&SettingsUpdate {
                display_message: Some("Shift A".into()),
                polling_interval: None,
            })
            .await
            .expect("update");
        provider
            .update_settings(&SettingsUpdate {
                display_message: Some(String::new()),
                polling_interval: Some(2000),
            })
            .await
            .expect("update");

        let settings = provider.settings().await.expect("settings");
        assert_eq!(settings.display_message.as_deref(), Some("Shift A"));
        assert_eq!(settings.polling_interval, Some(2000));
    }
}
