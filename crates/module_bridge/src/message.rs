use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

/// Channel name both endpoints agree on.
pub const DEFAULT_CHANNEL: &str = "com.example.flutter_module/channel";

/// Engine id the host caches its module engine under.
pub const DEFAULT_ENGINE_ID: &str = "my_flutter_engine";

/// Error code for a malformed or missing argument.
pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";

/// Methods the host answers (module -> host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "camelCase")]
pub enum HostMethod {
    ShowDialog,
}

/// Methods the module answers (host -> module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "camelCase")]
pub enum ModuleMethod {
    ShowMessage,
}

/// One inbound invocation as seen by a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Field `key` of an object argument, if present and of the right shape.
    pub fn argument<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.arguments
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The whole argument payload as `T`.
    pub fn arguments_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.arguments.clone())
    }
}

/// Handler-reported failure, carried back to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DispatchError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl DispatchError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Terminal resolution of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum CallOutcome {
    Success(Value),
    Error(DispatchError),
    NotImplemented,
}

impl CallOutcome {
    pub fn success(value: impl Into<Value>) -> Self {
        CallOutcome::Success(value.into())
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>, details: Option<Value>) -> Self {
        CallOutcome::Error(DispatchError::new(code, message, details))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Short label used in logs and call events.
    pub fn status(&self) -> &'static str {
        match self {
            CallOutcome::Success(_) => "success",
            CallOutcome::Error(_) => "error",
            CallOutcome::NotImplemented => "not_implemented",
        }
    }
}

/// Running state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    #[default]
    NotStarted,
    Running,
    Stopped,
}

/// What `attach_view` does when a surface is already attached.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SurfacePolicy {
    /// Hand out the existing surface again.
    #[default]
    Reuse,
    /// Refuse with a surface conflict.
    Exclusive,
}
