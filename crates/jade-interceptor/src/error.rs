//! Errors surfaced to page code by host APIs and their guarded wrappers.

use thiserror::Error;

/// Standard geolocation `PERMISSION_DENIED` code.
pub const PERMISSION_DENIED: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// A request-style API was denied before reaching the host.
    #[error("{message}")]
    Blocked { api: &'static str, message: String },

    /// Synthetic error handed to a callback-style API's error callback.
    #[error("{message}")]
    PermissionDenied { code: u16, message: String },

    /// The underlying host API itself failed. Passed through unchanged.
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    pub fn blocked(api: &'static str, message: &str) -> Self {
        HostError::Blocked {
            api,
            message: message.to_string(),
        }
    }

    pub fn permission_denied(message: &str) -> Self {
        HostError::PermissionDenied {
            code: PERMISSION_DENIED,
            message: message.to_string(),
        }
    }

    /// True for errors produced by a denial rather than by the host.
    pub fn is_denial(&self) -> bool {
        !matches!(self, HostError::Failed(_))
    }
}
