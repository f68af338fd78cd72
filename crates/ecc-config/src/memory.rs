//! ---
//! ecc_section: "03-configuration-management"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Runtime key/value configuration for equipment services."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{ConfigStore, ConfigStoreError, Result};

/// Process-local store.
#[derive(Default)]
pub struct MemoryConfigStore {
    values: DashMap<String, String>,
    offline: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: values.into_iter().collect(),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every call fail with `Unavailable`, simulating an unreachable store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ConfigStoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self
            .values
            .get(key)
            .map(|value| value.clone())
            .filter(|value| !value.is_empty()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_values_read_as_absent() {
        let store = MemoryConfigStore::new();
        store.set("svc/config/a", "").await.expect("set");
        assert_eq!(store.get("svc/config/a").await.expect("get"), None);
        store.set("svc/config/a", "1").await.expect("set");
        assert_eq!(
            store.get("svc/config/a").await.expect("get").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryConfigStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get("k").await,
            Err(ConfigStoreError::Unavailable(_))
        ));
    }
}
