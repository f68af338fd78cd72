//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
//! Simulated equipment. Each profile declares its controls, their handlers,
//! and the state a fresh service starts with.

use ecc_common::config::ProfileKind;
use ecc_msg::{Metadata, StateValue};

use crate::executor::{ControlError, ControlTable};

pub mod cnc;
pub mod printer;

/// Value written to a button's own state key once it has run.
pub(crate) const BUTTON_COMPLETED: &str = "COMPLETED";

pub struct Profile {
    pub kind: ProfileKind,
    pub equipment_type: &'static str,
    pub manufacturer: &'static str,
    pub version: &'static str,
    pub metadata: Metadata,
    pub initial_state: Vec<(String, StateValue)>,
    pub controls: ControlTable,
}

pub fn build(kind: ProfileKind) -> Result<Profile, ControlError> {
    match kind {
        ProfileKind::Cnc => cnc::profile(),
        ProfileKind::Printer => printer::profile(),
    }
}

fn metadata(entries: &[(&str, &str)]) -> Metadata {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}
