//! ---
//! ecc_section: "01-core-functionality"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Shared primitives and utilities for the core runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_retry_attempts() -> u8 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_increment() -> Duration {
    Duration::from_secs(1)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_min_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_heartbeat_max_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_heartbeat_interval_key() -> Option<String> {
    Some("polling-interval".to_owned())
}

fn default_registration_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_online_threshold() -> Duration {
    Duration::from_secs(30)
}

fn default_consumer_group() -> String {
    "aggregator".to_owned()
}

fn default_consul_address() -> String {
    "http://127.0.0.1:8500".to_owned()
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_store_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Primary configuration object for the equipment control center daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub config_store: ConfigStoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ECC_CONFIG";

    /// Load configuration from disk, respecting the `ECC_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.heartbeat.validate()?;
        if self.command.default_timeout.is_zero() {
            return Err(anyhow!("command.default_timeout must be greater than zero"));
        }
        if self.registry.online_threshold <= self.heartbeat.interval {
            return Err(anyhow!(
                "registry.online_threshold ({:?}) must exceed heartbeat.interval ({:?})",
                self.registry.online_threshold,
                self.heartbeat.interval
            ));
        }
        if self.registry.online_threshold <= self.heartbeat.max_interval {
            return Err(anyhow!(
                "registry.online_threshold ({:?}) must exceed heartbeat.max_interval ({:?})",
                self.registry.online_threshold,
                self.heartbeat.max_interval
            ));
        }
        if self.registry.consumer_group.trim().is_empty() {
            return Err(anyhow!("registry.consumer_group may not be empty"));
        }

        let mut service_ids = HashSet::new();
        for (name, service) in &self.services {
            if name.trim().is_empty() {
                return Err(anyhow!("service names may not be empty"));
            }
            if let Some(id) = &service.service_id {
                if id.trim().is_empty() {
                    return Err(anyhow!("service '{}' declares an empty service_id", name));
                }
                if !service_ids.insert(id.clone()) {
                    return Err(anyhow!("duplicate service_id '{}'", id));
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Encoding used for frames on the bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Cbor,
}

/// Bus delivery settings. Retries follow an incremental backoff: the first
/// retry waits `retry_interval`, each further retry adds `retry_increment`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default = "default_retry_attempts")]
    pub max_retries: u8,
    #[serde(default = "default_retry_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,
    #[serde(default = "default_retry_increment")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_increment: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            max_retries: default_retry_attempts(),
            retry_interval: default_retry_interval(),
            retry_increment: default_retry_increment(),
        }
    }
}

/// Equipment simulators shipped with the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Cnc,
    Printer,
}

impl ProfileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Cnc => "cnc",
            ProfileKind::Printer => "printer",
        }
    }
}

impl std::str::FromStr for ProfileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cnc" => Ok(ProfileKind::Cnc),
            "printer" => Ok(ProfileKind::Printer),
            other => Err(format!("unknown equipment profile: {}", other)),
        }
    }
}

/// One hosted equipment service. The map key is used as the service name
/// unless `service_name` overrides it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub profile: ProfileKind,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

impl ServiceConfig {
    pub fn new(profile: ProfileKind) -> Self {
        Self {
            profile,
            service_id: None,
            service_name: None,
            manufacturer: None,
            version: None,
            metadata: IndexMap::new(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_heartbeat_min_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub min_interval: Duration,
    /// Ceiling for store overrides; must stay below the registry online threshold.
    #[serde(default = "default_heartbeat_max_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_interval: Duration,
    /// Config store key consulted on every tick for an interval override (ms).
    #[serde(default = "default_heartbeat_interval_key")]
    pub interval_key: Option<String>,
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval.is_zero() {
            return Err(anyhow!("heartbeat.min_interval must be greater than zero"));
        }
        if self.interval < self.min_interval {
            return Err(anyhow!(
                "heartbeat.interval ({:?}) is below heartbeat.min_interval ({:?})",
                self.interval,
                self.min_interval
            ));
        }
        if self.interval > self.max_interval {
            return Err(anyhow!(
                "heartbeat.interval ({:?}) is above heartbeat.max_interval ({:?})",
                self.interval,
                self.max_interval
            ));
        }
        Ok(())
    }

    /// Clamp a requested interval into `[min_interval, max_interval]`.
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.max(self.min_interval).min(self.max_interval)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_interval(),
            min_interval: default_heartbeat_min_interval(),
            max_interval: default_heartbeat_max_interval(),
            interval_key: default_heartbeat_interval_key(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    #[serde(default = "default_registration_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub delay: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            delay: default_registration_delay(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_timeout: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_command_timeout(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_online_threshold")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub online_threshold: Duration,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            online_threshold: default_online_threshold(),
            consumer_group: default_consumer_group(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStoreBackend {
    #[default]
    Memory,
    Consul,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigStoreConfig {
    #[serde(default)]
    pub backend: ConfigStoreBackend,
    #[serde(default = "default_consul_address")]
    pub consul_address: String,
    #[serde(default = "default_store_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u8,
    #[serde(default = "default_store_backoff")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_backoff: Duration,
    /// Initial key/value pairs written to the memory backend at startup.
    #[serde(default)]
    pub seed: IndexMap<String, String>,
}

impl Default for ConfigStoreConfig {
    fn default() -> Self {
        Self {
            backend: ConfigStoreBackend::default(),
            consul_address: default_consul_address(),
            request_timeout: default_store_timeout(),
            max_attempts: default_retry_attempts(),
            retry_backoff: default_store_backoff(),
            seed: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}
