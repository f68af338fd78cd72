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

use super::{metadata, Profile};
use crate::executor::{ControlError, ControlTable};

const PRINT_CONTROL: &str = "Print Control";
const TEMPERATURE_CONTROL: &str = "Temperature Control";
const PRINT_SETTINGS: &str = "Print Settings";

const USER_COMMAND: &str = "User command";
const ADJUSTMENT: &str = "User adjustment";

pub fn profile() -> Result<Profile, ControlError> {
    let controls = ControlTable::new()
        .button(
            ControlDefinition::new(
                "start-print",
                "Start Print",
                ControlType::Button,
                PRINT_CONTROL,
            )
            .with_description("Start the 3D print job")
            .with_order(1),
            |state| {
                let started = StateValue::from(Utc::now().to_rfc3339());
                state.set_state("printer-status", StateValue::from("Printing"), Some(USER_COMMAND));
                state.set_state("print-started", started, Some("Start command"));
                "Print started successfully".into()
            },
        )?
        .button(
            ControlDefinition::new(
                "pause-print",
                "Pause Print",
                ControlType::Button,
                PRINT_CONTROL,
            )
            .with_description("Pause the current print")
            .with_order(2),
            |state| {
                state.set_state("printer-status", StateValue::from("Paused"), Some(USER_COMMAND));
                "Print paused".into()
            },
        )?
        .button(
            ControlDefinition::new("stop-print", "Stop Print", ControlType::Button, PRINT_CONTROL)
                .with_description("Stop and cancel the print job")
                .with_order(3)
                .with_metadata("style", "warning"),
            |state| {
                state.set_state("printer-status", StateValue::from("Stopped"), Some(USER_COMMAND));
                state.set_state("print-progress", StateValue::Number(0.0), Some("Print stopped"));
                "Print stopped".into()
            },
        )?
        .number(
            ControlDefinition::new(
                "bed-temperature",
                "Bed Temperature",
                ControlType::Slider,
                TEMPERATURE_CONTROL,
            )
            .with_description("Set heated bed temperature in °C")
            .with_current_value(60.0)
            .with_order(10)
            .with_constraints(ControlConstraints::range(0.0, 120.0, 5.0)),
            |state, temp| {
                state.set_state("bed-temperature", StateValue::Number(temp), Some(ADJUSTMENT));
                format!("Bed temperature set to {temp}°C")
            },
        )?
        .number(
            ControlDefinition::new(
                "nozzle-temperature",
                "Nozzle Temperature",
                ControlType::Slider,
                TEMPERATURE_CONTROL,
            )
            .with_description("Set nozzle temperature in °C")
            .with_current_value(200.0)
            .with_order(11)
            .with_constraints(ControlConstraints::range(0.0, 300.0, 5.0)),
            |state, temp| {
                state.set_state("nozzle-temperature", StateValue::Number(temp), Some(ADJUSTMENT));
                format!("Nozzle temperature set to {temp}°C")
            },
        )?
        .number(
            ControlDefinition::new(
                "print-speed",
                "Print Speed",
                ControlType::Slider,
                PRINT_SETTINGS,
            )
            .with_description("Set print speed as percentage")
            .with_current_value(100.0)
            .with_order(20)
            .with_constraints(ControlConstraints::range(10.0, 200.0, 10.0)),
            |state, speed| {
                state.set_state("print-speed", StateValue::Number(speed), Some(ADJUSTMENT));
                format!("Print speed set to {speed}%")
            },
        )?
        .text(
            ControlDefinition::new(
                "filament-type",
                "Filament Type",
                ControlType::TextInput,
                PRINT_SETTINGS,
            )
            .with_description("Current filament material type")
            .with_current_value("PLA")
            .with_order(21)
            .with_constraints(
                ControlConstraints::text(20, "^[a-zA-Z0-9 ]+$")
                    .with_message("Only alphanumeric characters and spaces allowed"),
            ),
            |state, filament| {
                state.set_state("filament-type", StateValue::from(filament), Some("User input"));
                format!("Filament type set to {filament}")
            },
        )?;

    Ok(Profile {
        kind: ProfileKind::Printer,
        equipment_type: "3D Printer",
        manufacturer: "Generic",
        version: "1.0.0",
        metadata: metadata(&[("location", "Lab 2"), ("capabilities", "FDM printing")]),
        initial_state: vec![
            ("printer-status".into(), StateValue::from("Idle")),
            ("bed-temperature".into(), StateValue::Number(0.0)),
            ("nozzle-temperature".into(), StateValue::Number(0.0)),
            ("print-speed".into(), StateValue::Number(100.0)),
            ("filament-type".into(), StateValue::from("PLA")),
            ("print-progress".into(), StateValue::Number(0.0)),
        ],
        controls,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::executor::ControlExecutor;
    use crate::state::{StateAccess, StateStore};
    use ecc_msg::{Metadata, ServiceIdentity};

    fn executor() -> (ControlExecutor, Arc<StateStore>) {
        let (state, _outbox) = StateStore::new(Arc::new(ServiceIdentity {
            service_id: "printer-01".into(),
            service_name: "printer-service".into(),
            machine_name: "bench".into(),
            equipment_type: "3D Printer".into(),
            manufacturer: "Generic".into(),
            version: "1.0.0".into(),
            metadata: Metadata::new(),
        }));
        let profile = profile().expect("printer profile");
        (ControlExecutor::new(profile.controls, state.clone()), state)
    }

    #[test]
    fn stop_print_resets_progress() {
        let (executor, state) = executor();
        state.set_state("print-progress", StateValue::Number(42.0), None);
        let result = executor
            .execute("stop-print", &StateValue::Bool(true))
            .expect("stop");
        assert_eq!(result, StateValue::from("Print stopped"));
        assert_eq!(state.get("print-progress"), Some(StateValue::Number(0.0)));
        assert_eq!(state.get("printer-status"), Some(StateValue::from("Stopped")));
    }

    #[test]
    fn print_speed_lower_bound() {
        let (executor, _) = executor();
        assert!(executor.execute("print-speed", &StateValue::Number(5.0)).is_err());
        assert_eq!(
            executor
                .execute("print-speed", &StateValue::Number(150.0))
                .expect("speed"),
            StateValue::from("Print speed set to 150%")
        );
    }

    #[test]
    fn filament_rejects_empty_and_symbols() {
        let (executor, state) = executor();
        state.set_state("filament-type", StateValue::from("PLA"), None);
        assert!(executor.execute("filament-type", &StateValue::from("")).is_err());
        assert_eq!(state.get("filament-type"), Some(StateValue::from("PLA")));
        assert!(executor.execute("filament-type", &StateValue::from("PETG+")).is_err());
        assert!(executor.execute("filament-type", &StateValue::from("PETG")).is_ok());
    }
}
