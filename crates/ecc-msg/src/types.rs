//! ---
//! ecc_section: "02-messaging-ipc-data-model"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Message schema helpers and protocol codecs."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use uuid::Uuid;

/// Schema version broadcast alongside every message payload.
pub const SCHEMA_VERSION: u16 = 1;

/// Current state of a service, keyed by state name.
pub type ServiceState = BTreeMap<String, StateValue>;

/// Free-form string metadata attached to identities and controls.
pub type Metadata = BTreeMap<String, String>;

/// A single state or control value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// Boolean flag such as `coolant-toggle`.
    Bool(bool),
    /// Numeric reading or set point.
    Number(f64),
    /// Free text, enumerations and timestamps.
    Text(String),
}

impl StateValue {
    /// Returns the contained boolean, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the contained number, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the contained text, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Name of the variant, used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            StateValue::Bool(_) => "bool",
            StateValue::Number(_) => "number",
            StateValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(value) => write!(f, "{value}"),
            StateValue::Number(value) => write!(f, "{value}"),
            StateValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Number(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Text(value.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Text(value)
    }
}

/// Immutable identity of an equipment service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceIdentity {
    /// Stable identifier used for routing.
    pub service_id: String,
    /// Logical service name; also the config store namespace.
    pub service_name: String,
    /// Host the service runs on.
    pub machine_name: String,
    /// Human readable equipment category.
    pub equipment_type: String,
    /// Equipment manufacturer.
    pub manufacturer: String,
    /// Software version of the service.
    pub version: String,
    /// Capability metadata (location, capabilities, ...).
    #[serde(default)]
    pub metadata: Metadata,
}

/// Widget family of a control, which also fixes the accepted value variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    /// Momentary action; any value is accepted and ignored.
    Button,
    /// On/off switch carrying a boolean.
    Toggle,
    /// Bounded numeric slider.
    Slider,
    /// Free text entry.
    TextInput,
    /// Numeric entry field.
    NumericInput,
    /// Selection from `allowedValues`.
    Dropdown,
    /// Group of labelled buttons sending a text value.
    MultiButton,
}

/// Validation constraints attached to a control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlConstraints {
    /// Inclusive lower bound for numeric controls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    /// Inclusive upper bound for numeric controls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Increment numeric values must align to, counted from `min_value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Maximum character count for text controls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regular expression text values must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Closed set of accepted text values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    /// Rejects empty text when set.
    #[serde(default)]
    pub is_required: bool,
    /// Message reported when validation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_message: Option<String>,
}

impl ControlConstraints {
    /// Numeric range constraint with a step.
    pub fn range(min: f64, max: f64, step: f64) -> Self {
        Self {
            min_value: Some(min),
            max_value: Some(max),
            step: Some(step),
            ..Self::default()
        }
    }

    /// Text constraint with a maximum length and pattern.
    pub fn text(max_length: usize, pattern: impl Into<String>) -> Self {
        Self {
            max_length: Some(max_length),
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// Attach the message reported on validation failure.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.validation_message = Some(message.into());
        self
    }
}

/// Static description of a control exposed by a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDefinition {
    /// Identifier used in commands.
    pub control_id: String,
    /// Label shown to operators.
    pub display_name: String,
    /// Widget family.
    #[serde(rename = "type")]
    pub control_type: ControlType,
    /// Grouping used by the rendering layer.
    pub category: String,
    /// Optional long description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Initial value hint, seeded into state at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<StateValue>,
    /// Optional validation constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ControlConstraints>,
    /// Sort key within the category.
    #[serde(default)]
    pub display_order: u32,
    /// Disabled controls reject every command.
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Rendering hints such as `style` or `confirm`.
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_enabled() -> bool {
    true
}

impl ControlDefinition {
    /// Create an enabled control without constraints.
    pub fn new(
        control_id: impl Into<String>,
        display_name: impl Into<String>,
        control_type: ControlType,
        category: impl Into<String>,
    ) -> Self {
        Self {
            control_id: control_id.into(),
            display_name: display_name.into(),
            control_type,
            category: category.into(),
            description: None,
            current_value: None,
            constraints: None,
            display_order: 0,
            is_enabled: true,
            metadata: Metadata::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the initial value hint.
    pub fn with_current_value(mut self, value: impl Into<StateValue>) -> Self {
        self.current_value = Some(value.into());
        self
    }

    /// Attach validation constraints.
    pub fn with_constraints(mut self, constraints: ControlConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Set the display order.
    pub fn with_order(mut self, order: u32) -> Self {
        self.display_order = order;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the control as disabled.
    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }
}

/// Health reported in heartbeats and mirrored by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HealthStatus {
    /// Publishing normally.
    Healthy,
    /// Running, but recent deliveries failed.
    Degraded,
    /// Not able to operate.
    Unhealthy,
    /// No heartbeat observed yet.
    #[default]
    Unknown,
}

/// Emitted once per service start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistered {
    /// Identity of the registering service.
    #[serde(flatten)]
    pub identity: ServiceIdentity,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Controls the service accepts.
    #[serde(default)]
    pub available_controls: Vec<ControlDefinition>,
}

/// Periodic liveness signal carrying a full state snapshot.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHeartbeat {
    /// Emitting service.
    pub service_id: String,
    /// Logical name of the emitting service.
    pub service_name: String,
    /// Host of the emitting service.
    pub machine_name: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Self-assessed health.
    pub health_status: HealthStatus,
    /// Point-in-time state snapshot.
    #[serde(default)]
    pub current_state: ServiceState,
    /// Time since the service started.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub uptime: Duration,
    /// Monotonic per-service heartbeat counter.
    pub message_count: u64,
}

/// Emitted whenever a state key changes value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStateChanged {
    /// Owning service.
    pub service_id: String,
    /// Logical name of the owning service.
    pub service_name: String,
    /// Host of the owning service.
    pub machine_name: String,
    /// Time of the mutation.
    pub timestamp: DateTime<Utc>,
    /// Changed key.
    pub state_key: String,
    /// Previous value, absent on the first write of a key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<StateValue>,
    /// New value.
    pub new_value: StateValue,
    /// Optional cause of the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request to operate a control on a specific service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommand {
    /// Correlation identifier, unique per request.
    pub command_id: String,
    /// Target service.
    pub service_id: String,
    /// Target control.
    pub control_id: String,
    /// Requested value.
    pub value: StateValue,
    /// Time the request was issued.
    pub requested_at: DateTime<Utc>,
    /// Optional requester label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl ControlCommand {
    /// Build a command with a fresh correlation id.
    pub fn new(
        service_id: impl Into<String>,
        control_id: impl Into<String>,
        value: StateValue,
    ) -> Self {
        Self {
            command_id: Uuid::new_v4().to_string(),
            service_id: service_id.into(),
            control_id: control_id.into(),
            value,
            requested_at: Utc::now(),
            requested_by: None,
        }
    }
}

/// Failure classification carried in command responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid argument or executor failure.
    ExecutionError,
    /// No control with the requested id.
    UnknownControl,
    /// The executor panicked.
    InternalError,
}

impl ErrorCode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::UnknownControl => "UNKNOWN_CONTROL",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Correlated reply to a [`ControlCommand`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlCommandResponse {
    /// Correlation identifier copied from the command.
    pub command_id: String,
    /// Responding service.
    pub service_id: String,
    /// Control that was operated.
    pub control_id: String,
    /// Whether the executor accepted the command.
    pub success: bool,
    /// Time the command finished processing.
    pub processed_at: DateTime<Utc>,
    /// Executor result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_value: Option<StateValue>,
    /// Human readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Time spent inside the service.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub processing_time: Duration,
}

impl ControlCommandResponse {
    /// Successful reply for `command`.
    pub fn succeeded(
        command: &ControlCommand,
        result_value: StateValue,
        processing_time: Duration,
    ) -> Self {
        Self {
            command_id: command.command_id.clone(),
            service_id: command.service_id.clone(),
            control_id: command.control_id.clone(),
            success: true,
            processed_at: Utc::now(),
            result_value: Some(result_value),
            error_message: None,
            error_code: None,
            processing_time,
        }
    }

    /// Failed reply for `command`.
    pub fn failed(
        command: &ControlCommand,
        code: ErrorCode,
        message: impl Into<String>,
        processing_time: Duration,
    ) -> Self {
        Self {
            command_id: command.command_id.clone(),
            service_id: command.service_id.clone(),
            control_id: command.control_id.clone(),
            success: false,
            processed_at: Utc::now(),
            result_value: None,
            error_message: Some(message.into()),
            error_code: Some(code),
            processing_time,
        }
    }
}

/// Closed set of payloads carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Service announced itself.
    ServiceRegistered(ServiceRegistered),
    /// Periodic liveness plus state snapshot.
    ServiceHeartbeat(ServiceHeartbeat),
    /// Single state key changed.
    ServiceStateChanged(ServiceStateChanged),
    /// Point-to-point command for a service.
    ControlCommand(ControlCommand),
    /// Point-to-point reply to a requester.
    ControlCommandResponse(ControlCommandResponse),
}

impl MessagePayload {
    /// Service the payload concerns.
    pub fn service_id(&self) -> &str {
        match self {
            MessagePayload::ServiceRegistered(event) => &event.identity.service_id,
            MessagePayload::ServiceHeartbeat(event) => &event.service_id,
            MessagePayload::ServiceStateChanged(event) => &event.service_id,
            MessagePayload::ControlCommand(command) => &command.service_id,
            MessagePayload::ControlCommandResponse(response) => &response.service_id,
        }
    }
}

/// Unified message structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Version of the schema used by the payload.
    pub schema_version: u16,
    /// Timestamp when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Endpoint replies should be sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Actual payload carried by the message.
    pub payload: MessagePayload,
}

impl Message {
    /// Construct a new message envelope around the provided payload.
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            reply_to: None,
            payload,
        }
    }

    /// Set the reply endpoint.
    pub fn with_reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Convenience accessor returning the payload kind as a static string.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            MessagePayload::ServiceRegistered(_) => "service_registered",
            MessagePayload::ServiceHeartbeat(_) => "service_heartbeat",
            MessagePayload::ServiceStateChanged(_) => "service_state_changed",
            MessagePayload::ControlCommand(_) => "control_command",
            MessagePayload::ControlCommandResponse(_) => "control_command_response",
        }
    }
}

/// Point-to-point endpoint of a service's command queue.
pub fn service_endpoint(service_id: &str) -> String {
    format!("service.{service_id}")
}
