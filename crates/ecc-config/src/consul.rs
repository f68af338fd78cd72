//! ---
//! ecc_section: "03-configuration-management"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Runtime key/value configuration for equipment services."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::{ConfigStore, ConfigStoreError, Result};

/// Consul KV over its HTTP API. Reads use `?raw` so the body is the value itself.
pub struct ConsulKvStore {
    client: Client,
    base: String,
}

impl ConsulKvStore {
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: address.trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ConfigStore for ConsulKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(key))
            .query(&[("raw", "")])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(key, "consul key not found");
                Ok(None)
            }
            status if status.is_success() => {
                let body = response.text().await?;
                Ok(Some(body).filter(|value| !value.is_empty()))
            }
            status => Err(ConfigStoreError::Status {
                key: key.to_owned(),
                status: status.as_u16(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let response = self
            .client
            .put(self.url(key))
            .body(value.to_owned())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConfigStoreError::Status {
                key: key.to_owned(),
                status: status.as_u16(),
            });
        }
        // Consul answers `true` or `false` depending on whether the write applied.
        let body = response.text().await?;
        if body.trim() == "false" {
            return Err(ConfigStoreError::Unavailable(format!(
                "consul rejected write of '{key}'"
            )));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "consul"
    }
}
