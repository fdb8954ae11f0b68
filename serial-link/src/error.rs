//! Common error types for serial-link.
//!
//! This module provides the crate-wide Error enum using thiserror, plus the
//! narrower OpenError that the transport reports when a device cannot be
//! opened.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Reasons a device connection could not be opened.
#[derive(Error, Debug)]
pub enum OpenError {
    /// Underlying I/O fault while opening or configuring the device
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Insufficient rights to read or write the device
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Device path does not exist or was unplugged
    #[error("no such device: {0}")]
    NoDevice(String),

    /// Baud rate, mode flags or path rejected
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for OpenError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => OpenError::PermissionDenied(e.to_string()),
            std::io::ErrorKind::NotFound => OpenError::NoDevice(e.to_string()),
            std::io::ErrorKind::InvalidInput => OpenError::InvalidInput(e.to_string()),
            _ => OpenError::IoFailure(e.to_string()),
        }
    }
}

impl From<tokio_serial::Error> for OpenError {
    fn from(e: tokio_serial::Error) -> Self {
        match e.kind {
            tokio_serial::ErrorKind::Io(kind) => std::io::Error::new(kind, e.description).into(),
            tokio_serial::ErrorKind::NoDevice => OpenError::NoDevice(e.description),
            tokio_serial::ErrorKind::InvalidInput => OpenError::InvalidInput(e.description),
            _ => OpenError::IoFailure(e.description),
        }
    }
}

/// Main error type for serial-link operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Device could not be opened
    #[error("Open error: {0}")]
    Open(#[from] OpenError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Most recent failure message of a session, shared with its tasks.
#[derive(Debug, Clone, Default)]
pub struct LastError(Arc<Mutex<Option<String>>>);

impl LastError {
    pub fn record(&self, message: impl Into<String>) {
        *self.0.lock() = Some(message.into());
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(std::io::ErrorKind::PermissionDenied, "permission denied" ; "permission")]
    #[test_case(std::io::ErrorKind::NotFound, "no such device" ; "missing device")]
    #[test_case(std::io::ErrorKind::InvalidInput, "invalid input" ; "bad settings")]
    #[test_case(std::io::ErrorKind::BrokenPipe, "I/O failure" ; "other io")]
    fn test_io_error_classification(kind: std::io::ErrorKind, prefix: &str) {
        let err = OpenError::from(std::io::Error::new(kind, "boom"));
        assert!(
            err.to_string().starts_with(prefix),
            "unexpected message: {}",
            err
        );
    }

    #[test]
    fn test_last_error_is_shared() {
        let owner = LastError::default();
        let task_side = owner.clone();
        assert_eq!(owner.get(), None);

        task_side.record("read failed");
        assert_eq!(owner.get().as_deref(), Some("read failed"));

        owner.clear();
        assert_eq!(task_side.get(), None);
    }

    #[test]
    fn test_serial_error_classification() {
        let err = OpenError::from(tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
            "EACCES",
        ));
        assert!(matches!(err, OpenError::PermissionDenied(_)));

        let err = OpenError::from(tokio_serial::Error::new(
            tokio_serial::ErrorKind::NoDevice,
            "gone",
        ));
        assert!(matches!(err, OpenError::NoDevice(ref msg) if msg == "gone"));
    }
}
