//! Error taxonomy for provisioning runs.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::control_plane::ControlPlaneError;

use super::ProvisioningResult;

/// Coarse error class used by outer layers to choose a status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The hypervisor could not be reached.
    Unavailable,
    /// A template or VM does not exist.
    NotFound,
    /// The identifier is out of range or taken.
    InvalidIdentifier,
    /// The request failed pre-flight checks.
    InvalidRequest,
    /// A submitted operation failed or timed out.
    OperationFailed,
    /// The VM exists but post-creation steps failed.
    PartialSuccess,
    /// Anything else.
    Unexpected,
}

impl ErrorKind {
    /// HTTP-style status code for the class.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Unavailable => 503,
            Self::NotFound => 404,
            Self::InvalidIdentifier
            | Self::InvalidRequest
            | Self::OperationFailed
            | Self::PartialSuccess => 400,
            Self::Unexpected => 500,
        }
    }
}

/// Post-creation step that can fail without undoing the VM.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    /// Core, memory, or tag overrides.
    Customization,
    /// Cloud-init payload delivery.
    GuestInit,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customization => formatter.write_str("customization"),
            Self::GuestInit => formatter.write_str("cloud-init configuration"),
        }
    }
}

/// A VM that exists but was not fully configured.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartialProvision {
    /// What had already succeeded.
    pub result: ProvisioningResult,
    /// Step that failed.
    pub stage: ProvisionStage,
    /// Failure reason.
    pub reason: String,
}

/// Errors raised by [`Provisioner`](super::Provisioner) operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The hypervisor could not be reached.
    #[error("control plane unavailable: {0}")]
    Connection(String),
    /// No VM with the template identifier exists.
    #[error("Template {vmid} not found")]
    TemplateNotFound {
        /// Requested template identifier.
        vmid: u32,
    },
    /// The source VM is not flagged as a template.
    #[error("VM {vmid} is not a template")]
    NotATemplate {
        /// Requested template identifier.
        vmid: u32,
    },
    /// The addressed VM does not exist.
    #[error("VM {vmid} not found")]
    VmNotFound {
        /// Requested identifier.
        vmid: u32,
    },
    /// The identifier lies outside the configured range.
    #[error("VM ID {vmid} is outside allowed range ({min}-{max})")]
    IdentifierOutOfRange {
        /// Offending identifier.
        vmid: u32,
        /// Lowest allowed identifier.
        min: u32,
        /// Highest allowed identifier.
        max: u32,
    },
    /// The hypervisor reported the identifier as taken.
    #[error("VM ID {vmid} is already in use")]
    IdentifierInUse {
        /// Offending identifier.
        vmid: u32,
    },
    /// The request failed pre-flight checks.
    #[error("invalid request: {}", issues.join("; "))]
    InvalidRequest {
        /// Issues in check order.
        issues: Vec<String>,
    },
    /// Submission or completion of a remote operation failed.
    #[error("{operation} failed: {message}")]
    OperationFailed {
        /// Operation name (`clone`, `create`, ...).
        operation: &'static str,
        /// Failure detail.
        message: String,
    },
    /// The VM exists but a post-creation step failed.
    #[error("VM {} cloned but {} failed: {}", .0.result.vmid, .0.stage, .0.reason)]
    PartiallyProvisioned(Box<PartialProvision>),
    /// Anything else, with the original message.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ProvisionError {
    /// Returns the error class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Unavailable,
            Self::TemplateNotFound { .. } | Self::NotATemplate { .. } | Self::VmNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::IdentifierOutOfRange { .. } | Self::IdentifierInUse { .. } => {
                ErrorKind::InvalidIdentifier
            }
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::OperationFailed { .. } => ErrorKind::OperationFailed,
            Self::PartiallyProvisioned(_) => ErrorKind::PartialSuccess,
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Returns the already-created VM when the error is a partial success.
    #[must_use]
    pub fn partial_result(&self) -> Option<&ProvisioningResult> {
        match self {
            Self::PartiallyProvisioned(partial) => Some(&partial.result),
            _ => None,
        }
    }

    /// Maps a failed submission of `operation` for `vmid`.
    pub(crate) fn from_submission(
        operation: &'static str,
        vmid: u32,
        error: ControlPlaneError,
    ) -> Self {
        match error {
            ControlPlaneError::AlreadyExists(_) => Self::IdentifierInUse { vmid },
            ControlPlaneError::Connection(message) => Self::Connection(message),
            other => Self::OperationFailed {
                operation,
                message: other.to_string(),
            },
        }
    }
}

impl From<ControlPlaneError> for ProvisionError {
    fn from(error: ControlPlaneError) -> Self {
        match error {
            ControlPlaneError::Connection(message) => Self::Connection(message),
            ControlPlaneError::Authentication(message) => {
                Self::Connection(format!("authentication failed: {message}"))
            }
            other => Self::Unexpected(other.to_string()),
        }
    }
}
