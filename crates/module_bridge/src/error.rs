use serde_json::Value;
use thiserror::Error;

use crate::message::DispatchError;

/// Failures of the engine lifecycle, reported synchronously to the caller of
/// `acquire`, `release` or `attach_view`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The module's entrypoint could not be started.
    #[error("engine `{id}` failed to start: {reason}")]
    StartFailed { id: String, reason: String },

    /// A view is already attached and the engine hands out only one.
    #[error("a view is already attached to engine `{0}`")]
    SurfaceConflict(String),

    /// The engine has been stopped (or never started).
    #[error("engine `{0}` is not running")]
    NotRunning(String),

    /// `release` was refused because a view still uses the engine.
    #[error("engine `{0}` still has an attached view")]
    ViewAttached(String),

    #[error("no engine registered under `{0}`")]
    Unknown(String),
}

/// Failures seen by the caller of `invoke`.
///
/// `MethodChannel::invoke_method` only ever returns `Closed` or `Codec`;
/// `Dispatch` and `NotImplemented` come from the typed `invoke` helper.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// The transport was torn down before the call resolved.
    #[error("channel `{0}` closed")]
    Closed(String),

    /// The remote handler reported an error.
    #[error("{method} failed with {code}: {message}")]
    Dispatch {
        method: String,
        code: String,
        message: String,
        details: Option<Value>,
    },

    /// The remote endpoint has no handler for the method.
    #[error("method `{0}` is not implemented by the remote endpoint")]
    NotImplemented(String),

    /// Arguments or result did not (de)serialize.
    #[error("codec error: {0}")]
    Codec(String),
}

impl ChannelError {
    pub(crate) fn dispatch(method: &str, err: DispatchError) -> Self {
        ChannelError::Dispatch {
            method: method.to_owned(),
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed(_))
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(err: serde_json::Error) -> ChannelError {
        ChannelError::Codec(err.to_string())
    }
}
