//! ---
//! ecc_section: "04-equipment-services"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Equipment service runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::sync::Arc;

use ecc_msg::{ControlDefinition, ControlType, ErrorCode, StateValue};
use indexmap::IndexMap;
use regex::Regex;
use tracing::info;

use crate::state::StateAccess;

/// Relative tolerance when checking slider steps.
const STEP_EPSILON: f64 = 1e-9;

/// Failures raised by a control handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Unknown control: {0}")]
    UnknownControl(String),
    #[error("invalid definition for control '{control_id}': {reason}")]
    InvalidDefinition { control_id: String, reason: String },
}

impl ControlError {
    /// Error code reported in the command response.
    pub fn code(&self) -> ErrorCode {
        match self {
            ControlError::UnknownControl(_) => ErrorCode::UnknownControl,
            ControlError::InvalidArgument(_) | ControlError::InvalidDefinition { .. } => {
                ErrorCode::ExecutionError
            }
        }
    }
}

pub type ControlResult = Result<StateValue, ControlError>;

type Handler = Box<dyn Fn(&dyn StateAccess, &StateValue) -> ControlResult + Send + Sync>;

struct ControlEntry {
    definition: ControlDefinition,
    pattern: Option<Regex>,
    handler: Handler,
}

/// Dispatch table from control id to its definition and handler.
#[derive(Default)]
pub struct ControlTable {
    entries: IndexMap<String, ControlEntry>,
}

impl ControlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a control with a raw handler. The value has already passed
    /// type and constraint checks when the handler runs.
    pub fn register<F>(
        mut self,
        definition: ControlDefinition,
        handler: F,
    ) -> Result<Self, ControlError>
    where
        F: Fn(&dyn StateAccess, &StateValue) -> ControlResult + Send + Sync + 'static,
    {
        let control_id = definition.control_id.clone();
        if self.entries.contains_key(&control_id) {
            return Err(ControlError::InvalidDefinition {
                control_id,
                reason: "duplicate control id".into(),
            });
        }
        let pattern = match definition
            .constraints
            .as_ref()
            .and_then(|c| c.pattern.as_deref())
        {
            Some(raw) => Some(Regex::new(raw).map_err(|err| ControlError::InvalidDefinition {
                control_id: control_id.clone(),
                reason: err.to_string(),
            })?),
            None => None,
        };
        self.entries.insert(
            control_id,
            ControlEntry {
                definition,
                pattern,
                handler: Box::new(handler),
            },
        );
        Ok(self)
    }

    /// Momentary action; the command value is ignored.
    pub fn button<F>(self, definition: ControlDefinition, action: F) -> Result<Self, ControlError>
    where
        F: Fn(&dyn StateAccess) -> String + Send + Sync + 'static,
    {
        self.register(definition, move |state, _| Ok(StateValue::Text(action(state))))
    }

    pub fn toggle<F>(self, definition: ControlDefinition, action: F) -> Result<Self, ControlError>
    where
        F: Fn(&dyn StateAccess, bool) -> String + Send + Sync + 'static,
    {
        self.register(definition, move |state, value| {
            let flag = value
                .as_bool()
                .ok_or_else(|| ControlError::InvalidArgument("expected a boolean".into()))?;
            Ok(StateValue::Text(action(state, flag)))
        })
    }

    pub fn number<F>(self, definition: ControlDefinition, action: F) -> Result<Self, ControlError>
    where
        F: Fn(&dyn StateAccess, f64) -> String + Send + Sync + 'static,
    {
        self.register(definition, move |state, value| {
            let number = value
                .as_f64()
                .ok_or_else(|| ControlError::InvalidArgument("expected a number".into()))?;
            Ok(StateValue::Text(action(state, number)))
        })
    }

    pub fn text<F>(self, definition: ControlDefinition, action: F) -> Result<Self, ControlError>
    where
        F: Fn(&dyn StateAccess, &str) -> String + Send + Sync + 'static,
    {
        self.register(definition, move |state, value| {
            let text = value
                .as_str()
                .ok_or_else(|| ControlError::InvalidArgument("expected a string".into()))?;
            Ok(StateValue::Text(action(state, text)))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Validates and runs control commands against a service's state.
pub struct ControlExecutor {
    table: ControlTable,
    state: Arc<dyn StateAccess>,
}

impl ControlExecutor {
    pub fn new(table: ControlTable, state: Arc<dyn StateAccess>) -> Self {
        Self { table, state }
    }

    /// Declared controls in registration order.
    pub fn definitions(&self) -> Vec<ControlDefinition> {
        self.table
            .entries
            .values()
            .map(|entry| entry.definition.clone())
            .collect()
    }

    pub fn definition(&self, control_id: &str) -> Option<&ControlDefinition> {
        self.table.entries.get(control_id).map(|entry| &entry.definition)
    }

    pub fn execute(&self, control_id: &str, value: &StateValue) -> ControlResult {
        let entry = self
            .table
            .entries
            .get(control_id)
            .ok_or_else(|| ControlError::UnknownControl(control_id.to_owned()))?;
        validate(&entry.definition, entry.pattern.as_ref(), value)?;
        info!(control_id, value = %value, "executing control");
        (entry.handler)(self.state.as_ref(), value)
    }
}

fn invalid(definition: &ControlDefinition, detail: String) -> ControlError {
    let message = definition
        .constraints
        .as_ref()
        .and_then(|c| c.validation_message.clone())
        .unwrap_or(detail);
    ControlError::InvalidArgument(message)
}

fn type_error(definition: &ControlDefinition, expected: &str, value: &StateValue) -> ControlError {
    ControlError::InvalidArgument(format!(
        "{} must be a {}, got {}",
        definition.display_name,
        expected,
        value.type_name()
    ))
}

/// Check the value against the control's declared type and constraints.
pub fn validate(
    definition: &ControlDefinition,
    pattern: Option<&Regex>,
    value: &StateValue,
) -> Result<(), ControlError> {
    if !definition.is_enabled {
        return Err(ControlError::InvalidArgument(format!(
            "{} is disabled",
            definition.display_name
        )));
    }
    let constraints = definition.constraints.clone().unwrap_or_default();
    match definition.control_type {
        ControlType::Button => Ok(()),
        ControlType::Toggle => match value {
            StateValue::Bool(_) => Ok(()),
            other => Err(type_error(definition, "boolean", other)),
        },
        ControlType::Slider | ControlType::NumericInput => {
            let number = match value {
                StateValue::Number(number) if number.is_finite() => *number,
                StateValue::Number(_) => {
                    return Err(ControlError::InvalidArgument(format!(
                        "{} must be a finite number",
                        definition.display_name
                    )))
                }
                other => return Err(type_error(definition, "number", other)),
            };
            if let Some(min) = constraints.min_value {
                if number < min {
                    return Err(invalid(
                        definition,
                        format!("{} must be at least {}", definition.display_name, min),
                    ));
                }
            }
            if let Some(max) = constraints.max_value {
                if number > max {
                    return Err(invalid(
                        definition,
                        format!("{} must be at most {}", definition.display_name, max),
                    ));
                }
            }
            if let Some(step) = constraints.step.filter(|step| *step > 0.0) {
                let steps = (number - constraints.min_value.unwrap_or(0.0)) / step;
                if (steps - steps.round()).abs() > STEP_EPSILON * steps.abs().max(1.0) {
                    return Err(invalid(
                        definition,
                        format!("{} must be a multiple of {}", definition.display_name, step),
                    ));
                }
            }
            Ok(())
        }
        ControlType::TextInput | ControlType::Dropdown | ControlType::MultiButton => {
            let text = match value {
                StateValue::Text(text) => text,
                other => return Err(type_error(definition, "string", other)),
            };
            if text.is_empty() {
                if constraints.is_required {
                    return Err(invalid(
                        definition,
                        format!("{} is required", definition.display_name),
                    ));
                }
                if pattern.is_none() && constraints.allowed_values.is_empty() {
                    return Ok(());
                }
            }
            if let Some(max_length) = constraints.max_length {
                if text.chars().count() > max_length {
                    return Err(invalid(
                        definition,
                        format!(
                            "{} must be at most {} characters",
                            definition.display_name, max_length
                        ),
                    ));
                }
            }
            if let Some(pattern) = pattern {
                if !pattern.is_match(text) {
                    return Err(invalid(
                        definition,
                        format!("{} has an invalid format", definition.display_name),
                    ));
                }
            }
            if !constraints.allowed_values.is_empty()
                && !constraints.allowed_values.iter().any(|allowed| allowed == text)
            {
                return Err(invalid(
                    definition,
                    format!(
                        "{} must be one of: {}",
                        definition.display_name,
                        constraints.allowed_values.join(", ")
                    ),
                ));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use ecc_msg::{ControlConstraints, Metadata, ServiceIdentity};

    fn store() -> Arc<StateStore> {
        StateStore::new(Arc::new(ServiceIdentity {
            service_id: "svc-1".into(),
            service_name: "svc".into(),
            machine_name: "bench".into(),
            equipment_type: "Test".into(),
            manufacturer: "Generic".into(),
            version: "1.0.0".into(),
            metadata: Metadata::new(),
        }))
        .0
    }

    fn executor() -> (ControlExecutor, Arc<StateStore>) {
        let state = store();
        let table = ControlTable::new()
            .number(
                ControlDefinition::new("speed", "Speed", ControlType::Slider, "Params")
                    .with_constraints(ControlConstraints::range(0.0, 5000.0, 100.0)),
                |state, value| {
                    state.set_state("speed", StateValue::Number(value), None);
                    format!("Speed set to {value}")
                },
            )
            .and_then(|t| {
                t.text(
                    ControlDefinition::new("name", "Name", ControlType::TextInput, "Params")
                        .with_constraints(
                            ControlConstraints::text(5, "^[a-z]*$").with_message("letters only"),
                        ),
                    |state, value| {
                        state.set_state("name", StateValue::from(value), None);
                        format!("Name set to {value}")
                    },
                )
            })
            .and_then(|t| {
                t.toggle(
                    ControlDefinition::new("lamp", "Lamp", ControlType::Toggle, "Params")
                        .disabled(),
                    |_, on| format!("lamp {on}"),
                )
            })
            .and_then(|t| {
                t.text(
                    ControlDefinition::new("mode", "Mode", ControlType::Dropdown, "Params")
                        .with_constraints(ControlConstraints {
                            allowed_values: vec!["auto".into(), "manual".into()],
                            is_required: true,
                            ..ControlConstraints::default()
                        }),
                    |_, value| value.to_owned(),
                )
            })
            .and_then(|t| {
                t.text(
                    ControlDefinition::new("unit", "Unit", ControlType::Dropdown, "Params")
                        .with_constraints(ControlConstraints {
                            allowed_values: vec!["mm".into(), "in".into()],
                            ..ControlConstraints::default()
                        }),
                    |_, value| value.to_owned(),
                )
            })
            .expect("valid table");
        (ControlExecutor::new(table, state.clone()), state)
    }

    #[test]
    fn unknown_control_is_reported() {
        let (executor, _) = executor();
        let err = executor
            .execute("missing", &StateValue::Bool(true))
            .expect_err("unknown");
        assert_eq!(err.code(), ErrorCode::UnknownControl);
    }

    #[test]
    fn type_mismatch_does_not_mutate_state() {
        let (executor, state) = executor();
        let err = executor
            .execute("speed", &StateValue::from("fast"))
            .expect_err("wrong type");
        assert_eq!(err.code(), ErrorCode::ExecutionError);
        assert_eq!(state.get("speed"), None);
    }

    #[test]
    fn numeric_constraints_are_enforced() {
        let (executor, state) = executor();
        assert!(executor.execute("speed", &StateValue::Number(5100.0)).is_err());
        assert!(executor.execute("speed", &StateValue::Number(150.0)).is_err());
        assert!(executor.execute("speed", &StateValue::Number(f64::NAN)).is_err());
        let result = executor
            .execute("speed", &StateValue::Number(1500.0))
            .expect("valid");
        assert_eq!(result, StateValue::from("Speed set to 1500"));
        assert_eq!(state.get("speed"), Some(StateValue::Number(1500.0)));
    }

    #[test]
    fn text_constraints_use_validation_message() {
        let (executor, _) = executor();
        let err = executor
            .execute("name", &StateValue::from("ABC"))
            .expect_err("pattern");
        assert_eq!(err, ControlError::InvalidArgument("letters only".into()));
        assert!(executor.execute("name", &StateValue::from("toolong")).is_err());
        assert!(executor.execute("name", &StateValue::from("")).is_ok());
        assert!(executor.execute("name", &StateValue::from("abc")).is_ok());
    }

    #[test]
    fn allowed_values_and_required_are_enforced() {
        let (executor, _) = executor();
        assert!(executor.execute("mode", &StateValue::from("")).is_err());
        assert!(executor.execute("mode", &StateValue::from("turbo")).is_err());
        assert!(executor.execute("mode", &StateValue::from("auto")).is_ok());
    }

    #[test]
    fn optional_dropdown_still_checks_allowed_values_on_empty_input() {
        let (executor, _) = executor();
        assert!(executor.execute("unit", &StateValue::from("")).is_err());
        assert!(executor.execute("unit", &StateValue::from("mm")).is_ok());
    }

    #[test]
    fn disabled_controls_reject_commands() {
        let (executor, _) = executor();
        let err = executor
            .execute("lamp", &StateValue::Bool(true))
            .expect_err("disabled");
        assert!(matches!(err, ControlError::InvalidArgument(_)));
    }

    #[test]
    fn invalid_pattern_is_a_definition_error() {
        let result = ControlTable::new().text(
            ControlDefinition::new("x", "X", ControlType::TextInput, "P")
                .with_constraints(ControlConstraints::text(3, "([")),
            |_, v| v.to_owned(),
        );
        assert!(matches!(result, Err(ControlError::InvalidDefinition { .. })));
    }

    #[test]
    fn definitions_keep_registration_order() {
        let (executor, _) = executor();
        let ids: Vec<_> = executor
            .definitions()
            .into_iter()
            .map(|d| d.control_id)
            .collect();
        assert_eq!(ids, vec!["speed", "name", "lamp", "mode", "unit"]);
    }
}
