//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use chrono::Utc;
use ecc_common::config::ProfileKind;
use ecc_msg::{ControlConstraints, ControlDefinition, ControlType, StateValue};

use super::{metadata, Profile, BUTTON_COMPLETED};
use crate::executor::{ControlError, ControlTable};

const MACHINE_CONTROL: &str = "Machine Control";
const MACHINE_PARAMETERS: &str = "Machine Parameters";
const PROGRAM_CONTROL: &str = "Program Control";

const USER_COMMAND: &str = "User command";
const ADJUSTMENT: &str = "User adjustment";
const EXECUTED: &str = "Button executed";

pub fn profile() -> Result<Profile, ControlError> {
    let controls = ControlTable::new()
        .button(
            ControlDefinition::new(
                "start-machine",
                "Start Machine",
                ControlType::Button,
                MACHINE_CONTROL,
            )
            .with_description("Start the CNC machine")
            .with_order(1),
            |state| {
                let started = StateValue::from(Utc::now().to_rfc3339());
                state.set_state("machine-status", StateValue::from("Running"), Some(USER_COMMAND));
                state.set_state("last-started", started, Some("Start command"));
                let done = StateValue::from(BUTTON_COMPLETED);
                state.set_state("start-machine", done, Some(EXECUTED));
                "Machine started successfully".into()
            },
        )?
        .button(
            ControlDefinition::new(
                "stop-machine",
                "Stop Machine",
                ControlType::Button,
                MACHINE_CONTROL,
            )
            .with_description("Stop the CNC machine")
            .with_order(2),
            |state| {
                state.set_state("machine-status", StateValue::from("Stopped"), Some(USER_COMMAND));
                let done = StateValue::from(BUTTON_COMPLETED);
                state.set_state("stop-machine", done, Some(EXECUTED));
                "Machine stopped successfully".into()
            },
        )?
        .button(
            ControlDefinition::new(
                "emergency-stop",
                "Emergency Stop",
                ControlType::Button,
                MACHINE_CONTROL,
            )
            .with_description("Emergency stop - immediately halt all operations")
            .with_order(3)
            .with_metadata("style", "danger")
            .with_metadata("confirm", "true"),
            |state| {
                state.set_state(
                    "machine-status",
                    StateValue::from("Emergency Stop"),
                    Some("Emergency button"),
                );
                state.set_state("emergency-active", StateValue::Bool(true), Some("User triggered"));
                let done = StateValue::from(BUTTON_COMPLETED);
                state.set_state("emergency-stop", done, Some(EXECUTED));
                "Emergency stop activated".into()
            },
        )?
        .number(
            ControlDefinition::new(
                "spindle-speed",
                "Spindle Speed",
                ControlType::Slider,
                MACHINE_PARAMETERS,
            )
            .with_description("Set spindle speed in RPM")
            .with_current_value(1000.0)
            .with_order(10)
            .with_constraints(ControlConstraints::range(0.0, 5000.0, 100.0)),
            |state, speed| {
                state.set_state("spindle-speed", StateValue::Number(speed), Some(ADJUSTMENT));
                format!("Spindle speed set to {speed} RPM")
            },
        )?
        .number(
            ControlDefinition::new(
                "feed-rate",
                "Feed Rate",
                ControlType::Slider,
                MACHINE_PARAMETERS,
            )
            .with_description("Set feed rate")
            .with_current_value(50.0)
            .with_order(11)
            .with_constraints(ControlConstraints::range(0.0, 200.0, 5.0)),
            |state, rate| {
                state.set_state("feed-rate", StateValue::Number(rate), Some(ADJUSTMENT));
                format!("Feed rate set to {rate}")
            },
        )?
        .toggle(
            ControlDefinition::new(
                "coolant-toggle",
                "Coolant",
                ControlType::Toggle,
                MACHINE_PARAMETERS,
            )
            .with_description("Enable/disable coolant")
            .with_current_value(false)
            .with_order(12),
            |state, on| {
                state.set_state("coolant-toggle", StateValue::Bool(on), Some("User toggle"));
                let message = if on { "Coolant enabled" } else { "Coolant disabled" };
                message.to_owned()
            },
        )?
        .text(
            ControlDefinition::new(
                "program-name",
                "Program Name",
                ControlType::TextInput,
                PROGRAM_CONTROL,
            )
            .with_description("Current program name")
            .with_current_value("")
            .with_order(20)
            .with_constraints(
                ControlConstraints::text(50, "^[a-zA-Z0-9_-]*$").with_message(
                    "Only alphanumeric characters, hyphens, and underscores allowed",
                ),
            ),
            |state, name| {
                state.set_state("program-name", StateValue::from(name), Some("User input"));
                format!("Program set to {name}")
            },
        )?;

    Ok(Profile {
        kind: ProfileKind::Cnc,
        equipment_type: "CNC",
        manufacturer: "Generic",
        version: "1.0.0",
        metadata: metadata(&[("location", "Shop Floor 1"), ("capabilities", "3-axis milling")]),
        initial_state: vec![
            ("machine-status".into(), StateValue::from("Idle")),
            ("emergency-active".into(), StateValue::Bool(false)),
        ],
        controls,
    })
}
