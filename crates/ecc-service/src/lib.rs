//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Equipment service runtime: each hosted service owns a state store, emits
//! heartbeats and state changes, registers itself, and executes control
//! commands arriving on its endpoint.

pub mod consumer;
pub mod executor;
pub mod heartbeat;
pub mod profiles;
pub mod registration;
pub mod runtime;
pub mod state;

pub use consumer::CommandConsumer;
pub use executor::{ControlError, ControlExecutor, ControlResult, ControlTable};
pub use heartbeat::HeartbeatEmitter;
pub use profiles::Profile;
pub use registration::{seed_state, RegistrationPublisher};
pub use runtime::{EquipmentService, ServiceHandle};
pub use state::{Outbox, StateAccess, StateStore};

/// Failures while configuring or starting a service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("control table rejected: {0}")]
    Control(#[from] ControlError),
    #[error("messaging error: {0}")]
    Messaging(#[from] ecc_msg::MessagingError),
}
