//! Core library for the `vmforge` VM provisioning tool.
//!
//! The crate sequences clone-or-create requests against a Proxmox VE cluster
//! through the [`ControlPlane`] abstraction, waits on the resulting
//! asynchronous tasks, delivers cloud-init payloads, and validates that the
//! provisioned guests are running and reachable. Every provisioning and
//! validation operation leaves a JSON audit record behind; read-only
//! [`Inventory`] queries cover templates, VM details and cluster status.

pub mod audit;
pub mod batch;
pub mod command;
pub mod config;
pub mod control_plane;
pub mod guest_init;
pub mod inventory;
pub mod logging;
pub mod provision;
pub mod proxmox;
pub mod request;
pub mod task;
pub mod test_support;
pub mod validation;

pub use audit::{AuditError, AuditEvent, AuditRecord, AuditSink, JsonLinesAuditSink};
pub use batch::{BatchExecutor, BatchKind, BatchReport};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, ProvisionConfig, ProxmoxConfig};
pub use control_plane::{ControlPlane, ControlPlaneError, Node, TaskHandle, Upid};
pub use guest_init::{CloudInitConfig, CloudInitUser, GuestInitError, SnippetStore, SshSnippetStore};
pub use inventory::{ClusterStatus, Inventory, TemplateInfo, VmInfo, VmRuntimeStatus};
pub use provision::{
    ErrorKind, LifecycleStatus, ProvisionError, Provisioner, ProvisioningResult,
};
pub use proxmox::{Credentials, ProxmoxClient};
pub use request::{
    CloneRequest, CreateRequest, OsType, PreflightReport, ProvisioningRequest,
    validate_clone_request, validate_create_request,
};
pub use task::{TaskOutcome, TaskWaiter};
pub use validation::{
    HealthStatus, PortProber, ProbeReport, TcpPortProber, ValidationCheck, ValidationEngine,
    ValidationResult, ValidationSettings,
};
