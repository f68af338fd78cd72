//! ---
//! ecc_section: "05-registry-and-commands"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Registry mirror and command dispatch."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Consumer-side view of the equipment fleet: a registry mirror fed by bus
//! events and a command client that correlates replies with requests.

pub mod aggregator;
pub mod client;
pub mod metrics;
pub mod registry;

pub use aggregator::Aggregator;
pub use client::{CommandClient, CommandError};
pub use metrics::{CommandOutcome, RegistryMetrics};
pub use registry::{RegistryError, RegistryEvent, ServiceRecord, ServiceRegistry, ServiceStatus};
