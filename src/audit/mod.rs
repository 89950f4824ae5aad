//! Append-only audit trail of provisioning and validation runs.
//!
//! Every orchestration exit path builds one [`AuditRecord`] and hands it to
//! an [`AuditSink`]. Sink failures are logged and swallowed so auditing never
//! changes the outcome of the operation being audited.

mod jsonl;

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::provision::{LifecycleStatus, ProvisioningResult};
use crate::request::{Bios, CloneRequest, CreateRequest, Machine, OsType};
use crate::validation::{HealthStatus, ValidationCheck, ValidationResult};

pub use jsonl::JsonLinesAuditSink;

/// Errors raised by audit sinks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AuditError {
    /// The record could not be serialised.
    #[error("failed to serialise audit record: {0}")]
    Serialize(String),
    /// The record could not be written.
    #[error("failed to write audit log {path}: {message}")]
    Io {
        /// Destination of the write.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    /// Persists one record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the record cannot be stored.
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        (**self).record(record)
    }
}

/// Hands `record` to `sink`, logging instead of failing when the sink errors.
pub(crate) fn emit<A: AuditSink + ?Sized>(sink: &A, record: &AuditRecord) {
    if let Err(err) = sink.record(record) {
        warn!(
            record_id = %record.record_id,
            operation = record.event.operation(),
            error = %err,
            "audit record dropped"
        );
    }
}

/// Outcome class stored with a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// The operation completed.
    Success,
    /// The operation failed.
    Failed,
    /// Some batch items failed.
    Partial,
}

/// One immutable audit entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Unique identifier of the record.
    pub record_id: Uuid,
    /// Emission time in UTC, serialised with a `Z` suffix.
    #[serde(serialize_with = "utc_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Hypervisor user performing the operation.
    pub username: String,
    /// Broad operation class (`create`, `clone`, `batch`, `validate`).
    pub operation_type: &'static str,
    /// Operation specific payload, tagged by `operation`.
    #[serde(flatten)]
    pub event: AuditEvent,
}

fn utc_seconds<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl AuditRecord {
    /// Stamps `event` with a fresh identifier and the current time.
    #[must_use]
    pub fn new(username: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            username: username.into(),
            operation_type: event.operation_type(),
            event,
        }
    }
}

/// Operation specific payload of an [`AuditRecord`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A create request.
    VmCreation(CreationEntry),
    /// A clone request.
    TemplateClone(CloneEntry),
    /// A batch of create requests.
    BatchCreate(BatchEntry),
    /// A batch of clone requests.
    BatchClone(BatchEntry),
    /// A batch mixing both kinds.
    BatchMixed(BatchEntry),
    /// A validation run.
    Validation(ValidationEntry),
}

impl AuditEvent {
    /// Value of the `operation` tag.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::VmCreation(_) => "vm_creation",
            Self::TemplateClone(_) => "template_clone",
            Self::BatchCreate(_) => "batch_create",
            Self::BatchClone(_) => "batch_clone",
            Self::BatchMixed(_) => "batch_mixed",
            Self::Validation(_) => "validation",
        }
    }

    /// Value of the `operation_type` field.
    #[must_use]
    pub const fn operation_type(&self) -> &'static str {
        match self {
            Self::VmCreation(_) => "create",
            Self::TemplateClone(_) => "clone",
            Self::BatchCreate(_) | Self::BatchClone(_) | Self::BatchMixed(_) => "batch",
            Self::Validation(_) => "validate",
        }
    }
}

/// Hardware settings captured for a create request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateConfiguration {
    /// Cores per socket.
    pub cores: u32,
    /// Sockets.
    pub sockets: u32,
    /// CPU model.
    pub cpu_type: String,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// Disk size in GiB.
    pub disk_size_gb: u32,
    /// Requested storage.
    pub storage: Option<String>,
    /// Requested bridge.
    pub network_bridge: Option<String>,
    /// NIC model.
    pub network_model: String,
    /// Guest OS family.
    pub os_type: OsType,
    /// Firmware.
    pub bios: Bios,
    /// Chipset.
    pub machine: Machine,
    /// Installer ISO.
    pub iso: Option<String>,
    /// Driver ISO.
    pub virtio_iso: Option<String>,
    /// Guest agent flag.
    pub enable_guest_agent: bool,
    /// Start flag.
    pub start_on_creation: bool,
    /// Tags.
    pub tags: Vec<String>,
}

impl From<&CreateRequest> for CreateConfiguration {
    fn from(request: &CreateRequest) -> Self {
        Self {
            cores: request.cores,
            sockets: request.sockets,
            cpu_type: request.cpu_type.clone(),
            memory_mb: request.memory,
            disk_size_gb: request.disk_size,
            storage: request.storage.clone(),
            network_bridge: request.network_bridge.clone(),
            network_model: request.network_model.clone(),
            os_type: request.os_type.clone(),
            bios: request.bios,
            machine: request.machine,
            iso: request.iso.clone(),
            virtio_iso: request.virtio_iso.clone(),
            enable_guest_agent: request.enable_guest_agent,
            start_on_creation: request.start_on_creation,
            tags: request.tags.clone(),
        }
    }
}

/// Settings captured for a clone request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CloneConfiguration {
    /// Core override.
    pub cores: Option<u32>,
    /// Memory override in MiB.
    pub memory_mb: Option<u32>,
    /// Requested storage.
    pub storage: Option<String>,
    /// Clone mode.
    pub full_clone: bool,
    /// Start flag.
    pub start_after_clone: bool,
    /// Tags.
    pub tags: Vec<String>,
    /// Whether a cloud-init payload was supplied.
    pub cloud_init: bool,
}

impl From<&CloneRequest> for CloneConfiguration {
    fn from(request: &CloneRequest) -> Self {
        Self {
            cores: request.cores,
            memory_mb: request.memory,
            storage: request.storage.clone(),
            full_clone: request.full_clone,
            start_after_clone: request.start_after_clone,
            tags: request.tags.clone(),
            cloud_init: request.cloud_init.is_some(),
        }
    }
}

/// Fields shared by create and clone entries describing the outcome.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OutcomeFields {
    /// Success or failure.
    pub status: AuditStatus,
    /// Requested VM name.
    pub vm_name: String,
    /// Identifier, when one was requested or allocated.
    pub vm_id: Option<u32>,
    /// Node that received the VM.
    pub node: Option<String>,
    /// Task identifier of the submission.
    pub task_id: Option<String>,
    /// Error message on failure.
    pub error: Option<String>,
}

impl OutcomeFields {
    /// Builds the fields from a finished result.
    #[must_use]
    pub fn from_result(result: &ProvisioningResult) -> Self {
        Self {
            status: AuditStatus::Success,
            vm_name: result.name.clone(),
            vm_id: Some(result.vmid),
            node: Some(result.node.clone()),
            task_id: result.task_id.clone(),
            error: None,
        }
    }

    /// Builds the fields for a failure before a result existed.
    #[must_use]
    pub fn failure(
        vm_name: impl Into<String>,
        vm_id: Option<u32>,
        node: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: AuditStatus::Failed,
            vm_name: vm_name.into(),
            vm_id,
            node,
            task_id: None,
            error: Some(error.into()),
        }
    }
}

/// Audit payload for a create request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreationEntry {
    /// Outcome of the request.
    #[serde(flatten)]
    pub outcome: OutcomeFields,
    /// Requested hardware.
    pub configuration: CreateConfiguration,
}

/// Source template reference.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SourceTemplate {
    /// Template identifier.
    pub template_id: u32,
    /// Template name when it could be resolved.
    pub template_name: Option<String>,
}

/// Audit payload for a clone request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CloneEntry {
    /// Outcome of the request.
    #[serde(flatten)]
    pub outcome: OutcomeFields,
    /// Template the clone came from.
    pub source_template: SourceTemplate,
    /// Requested settings.
    pub configuration: CloneConfiguration,
}

/// Aggregate counts for a batch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Number of requests.
    pub total_requested: usize,
    /// Requests that produced a VM.
    pub successful: usize,
    /// Requests that failed.
    pub failed: usize,
    /// Share of successful requests, for example `66.7%`.
    pub success_rate: String,
}

impl BatchSummary {
    /// Builds the summary for the given counts.
    #[must_use]
    pub fn new(total_requested: usize, successful: usize, failed: usize) -> Self {
        Self {
            total_requested,
            successful,
            failed,
            success_rate: success_rate(successful, total_requested),
        }
    }
}

/// Formats `successful / total` as a percentage with one decimal place,
/// rounding half up.
fn success_rate(successful: usize, total: usize) -> String {
    let Some(doubled_permille) = successful
        .saturating_mul(2000)
        .checked_div(total)
    else {
        return String::from("0%");
    };
    let permille = doubled_permille
        .saturating_add(1)
        .checked_div(2)
        .unwrap_or_default();
    let whole = permille.checked_div(10).unwrap_or_default();
    let tenth = permille.checked_rem(10).unwrap_or_default();
    format!("{whole}.{tenth}%")
}

/// Per-item line of a batch entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BatchOperation {
    /// Requested VM name.
    pub vm_name: String,
    /// Resulting identifier (`0` when none was assigned).
    pub vm_id: u32,
    /// Item status.
    pub status: LifecycleStatus,
    /// Item message.
    pub message: String,
}

/// Audit payload for a batch run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BatchEntry {
    /// `success`, or `partial` when any item failed.
    pub status: AuditStatus,
    /// Aggregate counts.
    pub summary: BatchSummary,
    /// Per-item outcomes in request order.
    pub operations: Vec<BatchOperation>,
}

/// Audit payload for a validation run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationEntry {
    /// Validated VM.
    pub vm_id: u32,
    /// VM name when known.
    pub vm_name: Option<String>,
    /// Aggregate health.
    pub validation_status: HealthStatus,
    /// Resolved guest address.
    pub ip_address: Option<String>,
    /// Checks in execution order.
    pub checks: IndexMap<String, ValidationCheck>,
}

impl ValidationEntry {
    /// Captures a finished validation.
    #[must_use]
    pub fn from_result(result: &ValidationResult, vm_name: Option<String>) -> Self {
        Self {
            vm_id: result.vmid,
            vm_name,
            validation_status: result.status,
            ip_address: result.ip_address.clone(),
            checks: result.checks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2, 3, "66.7%")]
    #[case(3, 3, "100.0%")]
    #[case(0, 4, "0.0%")]
    #[case(1, 8, "12.5%")]
    #[case(0, 0, "0%")]
    fn success_rate_rounds_to_one_decimal(
        #[case] successful: usize,
        #[case] total: usize,
        #[case] expected: &str,
    ) {
        assert_eq!(success_rate(successful, total), expected);
    }

    #[test]
    fn creation_record_serialises_flat() {
        let request = CreateRequest::named("web-01");
        let record = AuditRecord::new(
            "root@pam",
            AuditEvent::VmCreation(CreationEntry {
                outcome: OutcomeFields::failure("web-01", Some(150), None, "boom"),
                configuration: CreateConfiguration::from(&request),
            }),
        );
        let value = serde_json::to_value(&record)
            .unwrap_or_else(|err| panic!("record should serialise: {err}"));

        assert_eq!(value["operation"], "vm_creation");
        assert_eq!(value["operation_type"], "create");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["vm_id"], 150);
        assert_eq!(value["error"], "boom");
        assert_eq!(value["configuration"]["memory_mb"], 2048);
        assert_eq!(value["configuration"]["os_type"], "linux");
        let timestamp = value["timestamp"].as_str().unwrap_or_default();
        assert!(timestamp.ends_with('Z'), "timestamp should be UTC: {timestamp}");
    }

    #[test]
    fn batch_record_carries_operation_name() {
        let record = AuditRecord::new(
            "root@pam",
            AuditEvent::BatchClone(BatchEntry {
                status: AuditStatus::Partial,
                summary: BatchSummary::new(2, 1, 1),
                operations: Vec::new(),
            }),
        );
        let value = serde_json::to_value(&record)
            .unwrap_or_else(|err| panic!("record should serialise: {err}"));

        assert_eq!(value["operation"], "batch_clone");
        assert_eq!(value["operation_type"], "batch");
        assert_eq!(value["status"], "partial");
        assert_eq!(value["summary"]["success_rate"], "50.0%");
    }
}
