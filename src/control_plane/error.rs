//! Errors surfaced by control-plane clients.

use thiserror::Error;

/// Failure reported by a [`ControlPlane`](super::ControlPlane) call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControlPlaneError {
    /// The hypervisor could not be reached, or a gateway in front of it
    /// reported it unavailable (HTTP 502, 503 or 504).
    #[error("control plane unreachable: {0}")]
    Connection(String),
    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// The resource (usually a VM identifier) is already taken.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    /// Any other API rejection, including the HTTP 500 answers Proxmox uses
    /// for most refused operations.
    #[error("control plane rejected request (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Body or reason supplied by the server.
        message: String,
    },
    /// The response could not be decoded.
    #[error("failed to decode control plane response: {0}")]
    Decode(String),
}

impl ControlPlaneError {
    /// Classifies an error response from its status code and body text.
    #[must_use]
    pub fn from_response(status: u16, message: impl Into<String>) -> Self {
        let text = message.into();
        let lowered = text.to_lowercase();
        if lowered.contains("already exists") {
            return Self::AlreadyExists(text);
        }
        match status {
            401 => Self::Authentication(text),
            404 => Self::NotFound(text),
            502..=504 => Self::Connection(text),
            _ if lowered.contains("does not exist") => Self::NotFound(text),
            _ => Self::Api {
                status,
                message: text,
            },
        }
    }

    /// Returns `true` for transport-level failures.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}
