// src/io/error.rs
//
// Error taxonomy for opening and running port sessions.

use std::fmt;
use thiserror::Error;

/// Why a port could not be opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenErrorKind {
    /// Another process holds the device exclusively
    PortBusy,
    PortNotFound,
    PermissionDenied,
    /// Any other open failure (bad settings, driver error)
    Other,
}

impl fmt::Display for OpenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenErrorKind::PortBusy => f.write_str("port busy"),
            OpenErrorKind::PortNotFound => f.write_str("port not found"),
            OpenErrorKind::PermissionDenied => f.write_str("permission denied"),
            OpenErrorKind::Other => f.write_str("open failed"),
        }
    }
}

/// A single port that failed to open at startup
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{device_path}: {kind} ({message})")]
pub struct OpenFailure {
    pub device_path: String,
    pub kind: OpenErrorKind,
    pub message: String,
}

impl OpenFailure {
    pub fn new(device_path: impl Into<String>, kind: OpenErrorKind, message: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TapError {
    /// One or more ports failed to open; nothing was captured
    #[error("capture aborted, {} port(s) failed to open: {}", .0.len(), join_failures(.0))]
    StartupAborted(Vec<OpenFailure>),

    #[error("device {device} lost: {reason}")]
    DeviceLost { device: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TapError {
    /// Device paths that caused a startup abort (empty for other errors)
    pub fn failed_ports(&self) -> Vec<&str> {
        match self {
            TapError::StartupAborted(failures) => {
                failures.iter().map(|f| f.device_path.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join_failures(failures: &[OpenFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_aborted_names_ports() {
        let err = TapError::StartupAborted(vec![OpenFailure::new(
            "/dev/ttyUSB1",
            OpenErrorKind::PortBusy,
            "Device or resource busy",
        )]);
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyUSB1"));
        assert!(msg.contains("port busy"));
        assert_eq!(err.failed_ports(), vec!["/dev/ttyUSB1"]);
    }

    #[test]
    fn test_failed_ports_empty_for_other_errors() {
        let err = TapError::InvalidConfig("bad".into());
        assert!(err.failed_ports().is_empty());
    }
}
