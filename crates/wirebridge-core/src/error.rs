//! Error taxonomy.
//!
//! Build-time problems ([`BuildError`]) abort startup and never reach a
//! client. Everything that goes wrong while serving a request is turned into a
//! [`BridgeError`] envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Machine-readable error code carried by every error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    UnknownCommand,
    InvalidArgument,
    ExecutionError,
    ChannelInitError,
    ChannelError,
    UnknownError,
    InternalError,
    /// Handler-supplied code, passed through verbatim.
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::ChannelInitError => "CHANNEL_INIT_ERROR",
            ErrorCode::ChannelError => "CHANNEL_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Custom(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "UNKNOWN_COMMAND" => ErrorCode::UnknownCommand,
            "INVALID_ARGUMENT" => ErrorCode::InvalidArgument,
            "EXECUTION_ERROR" => ErrorCode::ExecutionError,
            "CHANNEL_INIT_ERROR" => ErrorCode::ChannelInitError,
            "CHANNEL_ERROR" => ErrorCode::ChannelError,
            "UNKNOWN_ERROR" => ErrorCode::UnknownError,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            other => ErrorCode::Custom(other.to_string()),
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        code.as_str().into()
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

/// The wire error envelope: `{ code, message, details? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl BridgeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unknown_command(name: &str) -> Self {
        Self::new(
            ErrorCode::UnknownCommand,
            format!("Command '{name}' not found"),
        )
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// An invalid argument pinned to a field path such as `task.tags[1]`.
    pub fn invalid_field(path: &str, message: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidArgument,
            format!("Invalid argument '{path}': {message}"),
        )
        .with_details(serde_json::json!({ "path": path }))
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionError, message)
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChannelError, message)
    }

    pub fn channel_init(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ChannelInitError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

/// Failure raised by a command or socket handler.
///
/// Without an explicit code it is reported as `EXECUTION_ERROR` from unary
/// calls and `CHANNEL_ERROR` from streams.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    pub code: Option<ErrorCode>,
    pub message: String,
    pub details: Option<Value>,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Wrap any displayable error.
    pub fn from_err(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }

    pub fn into_bridge_error(self, default: ErrorCode) -> BridgeError {
        BridgeError {
            code: self.code.unwrap_or(default),
            message: self.message,
            details: self.details,
        }
    }
}

impl From<&str> for CommandError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CommandError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialization failed: {err}"))
    }
}

impl From<BridgeError> for CommandError {
    fn from(err: BridgeError) -> Self {
        Self {
            code: Some(err.code),
            message: err.message,
            details: err.details,
        }
    }
}

/// Registry construction failures. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("name conflict: '{0}' is registered more than once")]
    DuplicateName(String),
    #[error("command '{command}' declares parameter '{param}' more than once")]
    DuplicateParameter { command: String, param: String },
    #[error("command '{0}' has no handler")]
    MissingHandler(String),
    #[error("command '{0}' has a handler that does not match its kind")]
    HandlerMismatch(String),
    #[error("stream command '{0}' must declare its payload type")]
    MissingStreamPayload(String),
    #[error("{owner}: type '{name}' is referenced but never defined")]
    UnresolvedReference { owner: String, name: String },
    #[error("type '{name}' has conflicting definitions ({first}; {second})")]
    ConflictingDefinition {
        name: String,
        first: String,
        second: String,
    },
    #[error("{owner}: stream type is not representable at '{path}'")]
    Unrepresentable { owner: String, path: String },
    #[error("socket '{socket}' handles undeclared client event '{event}'")]
    UndeclaredEvent { socket: String, event: String },
}
