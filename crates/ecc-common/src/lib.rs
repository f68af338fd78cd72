//! ---
//! ecc_section: "01-core-functionality"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Shared primitives and utilities for the core runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Core shared primitives for the equipment control center workspace.
//! This crate exposes configuration loading, logging, and time helpers
//! consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, BusConfig, CommandConfig, ConfigStoreBackend, ConfigStoreConfig,
    HeartbeatConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, ProfileKind,
    RegistrationConfig, RegistryConfig, ServiceConfig, WireFormat,
};
pub use logging::{init_tracing, LogFormat};
