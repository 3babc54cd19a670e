// SPDX-License-Identifier: GPL-3.0-only

//! Error types for camera control
//!
//! Hardware failures are converted into [`CameraError`] at the dispatcher
//! boundary. Callers of one-shot operations only ever see the coarse
//! [`ErrorReason`] delivered through their error callback.

use std::fmt;

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

/// Result type for HAL calls
pub type HalResult<T> = Result<T, HalError>;

/// Main camera control error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// Open or initialization failed; the session never became usable
    HardwareUnavailable(String),
    /// Malformed region, size, key or value
    InvalidArgument(String),
    /// The hardware could not allocate buffers for the request
    OutOfMemory,
    /// The camera was taken over before the operation finished
    OperationCancelled,
    /// The handle no longer refers to a live session
    NoSuchSession,
    /// Internal invariant violation
    Unexpected(String),
}

/// Reason string surfaced to error callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    Failure,
    Cancelled,
    OutOfMemory,
}

impl ErrorReason {
    /// Wire name of the reason
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::Failure => "FAILURE",
            ErrorReason::Cancelled => "CANCELLED",
            ErrorReason::OutOfMemory => "OUT_OF_MEMORY",
        }
    }
}

/// Errors reported by a HAL implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// No camera with the requested index
    NoDevice(u32),
    /// Device already in use or not in a state to accept the call
    Busy,
    /// Driver I/O failure
    Io(String),
    /// Operation not provided by this HAL
    Unsupported(&'static str),
    /// Buffer allocation failed in the driver
    NoMemory,
}

/// Illegal state machine transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: crate::control::state::CameraState,
    pub event: crate::control::state::StateEvent,
}

/// Configuration load/save errors
#[derive(Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    Io(std::io::Error),
    /// The file is not valid configuration JSON
    Parse(serde_json::Error),
    /// No configuration directory on this system
    NoConfigDir,
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::HardwareUnavailable(msg) => write!(f, "Hardware unavailable: {}", msg),
            CameraError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CameraError::OutOfMemory => write!(f, "Out of memory"),
            CameraError::OperationCancelled => write!(f, "Operation cancelled"),
            CameraError::NoSuchSession => write!(f, "No such session"),
            CameraError::Unexpected(msg) => write!(f, "Unexpected error: {}", msg),
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::NoDevice(index) => write!(f, "No camera device {}", index),
            HalError::Busy => write!(f, "Camera is busy"),
            HalError::Io(msg) => write!(f, "Driver I/O error: {}", msg),
            HalError::Unsupported(op) => write!(f, "Operation not supported: {}", op),
            HalError::NoMemory => write!(f, "Driver out of memory"),
        }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal transition from {:?} on {:?}", self.from, self.event)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
            ConfigError::NoConfigDir => write!(f, "No configuration directory available"),
        }
    }
}

impl std::error::Error for CameraError {}
impl std::error::Error for HalError {}
impl std::error::Error for TransitionError {}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::NoConfigDir => None,
        }
    }
}

impl From<&CameraError> for ErrorReason {
    fn from(err: &CameraError) -> Self {
        match err {
            CameraError::OutOfMemory => ErrorReason::OutOfMemory,
            CameraError::OperationCancelled => ErrorReason::Cancelled,
            _ => ErrorReason::Failure,
        }
    }
}

impl From<CameraError> for ErrorReason {
    fn from(err: CameraError) -> Self {
        ErrorReason::from(&err)
    }
}

// HAL failures surface as hardware errors; open failures are mapped
// separately by the registry.
impl From<HalError> for CameraError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::NoDevice(_) => CameraError::HardwareUnavailable(err.to_string()),
            HalError::NoMemory => CameraError::OutOfMemory,
            HalError::Unsupported(op) => {
                CameraError::InvalidArgument(format!("unsupported operation: {}", op))
            }
            other => CameraError::Unexpected(other.to_string()),
        }
    }
}

impl From<TransitionError> for CameraError {
    fn from(err: TransitionError) -> Self {
        CameraError::Unexpected(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        assert_eq!(ErrorReason::Failure.as_str(), "FAILURE");
        assert_eq!(ErrorReason::Cancelled.as_str(), "CANCELLED");
        assert_eq!(ErrorReason::OutOfMemory.to_string(), "OUT_OF_MEMORY");
    }

    #[test]
    fn test_reason_from_error() {
        assert_eq!(
            ErrorReason::from(CameraError::OperationCancelled),
            ErrorReason::Cancelled
        );
        assert_eq!(
            ErrorReason::from(CameraError::OutOfMemory),
            ErrorReason::OutOfMemory
        );
        assert_eq!(
            ErrorReason::from(CameraError::NoSuchSession),
            ErrorReason::Failure
        );
        assert_eq!(
            ErrorReason::from(CameraError::InvalidArgument("x".into())),
            ErrorReason::Failure
        );
    }

    #[test]
    fn test_hal_error_conversion() {
        assert!(matches!(
            CameraError::from(HalError::NoDevice(3)),
            CameraError::HardwareUnavailable(_)
        ));
        assert!(matches!(
            CameraError::from(HalError::Busy),
            CameraError::Unexpected(_)
        ));
        assert_eq!(
            ErrorReason::from(CameraError::from(HalError::NoMemory)),
            ErrorReason::OutOfMemory
        );
    }
}
