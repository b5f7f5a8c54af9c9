//! Error taxonomy for the capture kernel.
//!
//! Device lifecycle failures (`DeviceUnavailable`, `ConfigurationRejected`,
//! `Transport` during `start`) move the session to Faulted. `Transport` during
//! a poll is downgraded to "no data" by the acquisition loop. `Persistence`
//! disables continuous saving. `InvalidActionForState` is benign and only ever
//! surfaces as a status message.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionState;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Clone, Debug, Error)]
pub enum CaptureError {
    /// The device is missing or already claimed by another process.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device refused the requested stream configuration.
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// Link-level failure talking to the device.
    #[error("transport error: {0}")]
    Transport(String),

    /// A save batch could not write one of its files.
    #[error("failed to write {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("{action} is not valid while the session is {state}")]
    InvalidActionForState {
        action: &'static str,
        state: SessionState,
    },
}

/// Field-less discriminant of [`CaptureError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceUnavailable,
    ConfigurationRejected,
    Transport,
    Persistence,
    InvalidActionForState,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            CaptureError::ConfigurationRejected(_) => ErrorKind::ConfigurationRejected,
            CaptureError::Transport(_) => ErrorKind::Transport,
            CaptureError::Persistence { .. } => ErrorKind::Persistence,
            CaptureError::InvalidActionForState { .. } => ErrorKind::InvalidActionForState,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CaptureError::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
