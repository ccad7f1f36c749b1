use crate::frame::{BusKind, FormatError};
use crate::participant::EndpointKind;
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Status codes reported by the registry/transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnCode {
    Success,
    UnspecifiedError,
    NotSupported,
    NotImplemented,
    BadParameter,
    BufferTooSmall,
    Timeout,
    UnsupportedService,
    WrongState,
    TypeConversionError,
    ConfigurationError,
    ProtocolError,
    AssertionError,
    ExtensionError,
    LogicError,
    LengthError,
    OutOfRangeError,
}

impl ReturnCode {
    const ALL: [ReturnCode; 17] = [
        ReturnCode::Success,
        ReturnCode::UnspecifiedError,
        ReturnCode::NotSupported,
        ReturnCode::NotImplemented,
        ReturnCode::BadParameter,
        ReturnCode::BufferTooSmall,
        ReturnCode::Timeout,
        ReturnCode::UnsupportedService,
        ReturnCode::WrongState,
        ReturnCode::TypeConversionError,
        ReturnCode::ConfigurationError,
        ReturnCode::ProtocolError,
        ReturnCode::AssertionError,
        ReturnCode::ExtensionError,
        ReturnCode::LogicError,
        ReturnCode::LengthError,
        ReturnCode::OutOfRangeError,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReturnCode::Success => "SUCCESS",
            ReturnCode::UnspecifiedError => "UNSPECIFIED ERROR",
            ReturnCode::NotSupported => "NOT SUPPORTED",
            ReturnCode::NotImplemented => "NOT IMPLEMENTED",
            ReturnCode::BadParameter => "BAD PARAMETER",
            ReturnCode::BufferTooSmall => "BUFFER TOO SMALL",
            ReturnCode::Timeout => "TIMEOUT",
            ReturnCode::UnsupportedService => "UNSUPPORTED SERVICE",
            ReturnCode::WrongState => "WRONG STATE",
            ReturnCode::TypeConversionError => "TYPECONVERSION ERROR",
            ReturnCode::ConfigurationError => "CONFIGURATION ERROR",
            ReturnCode::ProtocolError => "PROTOCOL ERROR",
            ReturnCode::AssertionError => "ASSERTION ERROR",
            ReturnCode::ExtensionError => "EXTENSION ERROR",
            ReturnCode::LogicError => "LOGIC ERROR",
            ReturnCode::LengthError => "LENGTH ERROR",
            ReturnCode::OutOfRangeError => "OUT OF RANGE ERROR",
        }
    }
}

impl core::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("participant '{0}' already exists")]
    DuplicateName(String),

    #[error("{kind} endpoint '{name}' already exists on participant '{participant}'")]
    DuplicateEndpoint {
        participant: String,
        kind: EndpointKind,
        name: String,
    },

    #[error("{kind} endpoint '{key}' does not exist")]
    Lookup { kind: EndpointKind, key: String },

    /// Nothing is queued. Expected while polling.
    #[error("receive queue of '{0}' is empty")]
    QueueEmpty(String),

    #[error("'{slave}' did not receive a time beacon within {timeout:?}")]
    SyncTimeout { slave: String, timeout: Duration },

    #[error("'{controller}' saw no acknowledgment for bus id {bus_id:#x} within {timeout:?}")]
    AckTimeout {
        controller: String,
        bus_id: u32,
        timeout: Duration,
    },

    #[error("'{controller}' did not reach state {expected} within {timeout:?}")]
    StateTimeout {
        controller: String,
        expected: String,
        timeout: Duration,
    },

    #[error("Error {}: {operation} failed ({reason})", code.code())]
    Transport {
        code: ReturnCode,
        reason: String,
        operation: &'static str,
    },

    #[error("malformed {kind} frame: {source}")]
    Format {
        kind: BusKind,
        #[source]
        source: FormatError,
    },

    #[error("invalid frame for '{controller}': {reason}")]
    InvalidFrame { controller: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to launch {name}: {source}")]
    Process {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} exited during startup ({status})")]
    ProcessExited { name: String, status: ExitStatus },

    #[error("{component} was not ready within {timeout:?}")]
    StartTimeout {
        component: String,
        timeout: Duration,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transport(code: ReturnCode, reason: impl Into<String>, operation: &'static str) -> Self {
        Error::Transport {
            code,
            reason: reason.into(),
            operation,
        }
    }

    pub fn is_queue_empty(&self) -> bool {
        matches!(self, Error::QueueEmpty(_))
    }

    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Error::Transport { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_round_trip() {
        for code in ReturnCode::ALL {
            assert_eq!(ReturnCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ReturnCode::from_code(-1), None);
        assert_eq!(ReturnCode::from_code(17), None);
    }

    #[test]
    fn test_transport_error_message() {
        let err = Error::transport(ReturnCode::WrongState, "controller is stopped", "sleep");
        assert_eq!(err.to_string(), "Error 8: sleep failed (controller is stopped)");
        assert_eq!(err.return_code(), Some(ReturnCode::WrongState));
        assert!(!err.is_queue_empty());
    }
}
