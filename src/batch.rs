//! Sequential execution of provisioning batches.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{
    self, AuditEvent, AuditRecord, AuditSink, AuditStatus, BatchEntry, BatchOperation,
    BatchSummary,
};
use crate::control_plane::ControlPlane;
use crate::provision::{LifecycleStatus, ProvisioningResult, Provisioner};
use crate::request::ProvisioningRequest;

/// Request kinds present in a batch; selects the audit operation name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchKind {
    /// Only create requests.
    Create,
    /// Only clone requests.
    Clone,
    /// Both kinds.
    Mixed,
}

impl BatchKind {
    /// Classifies `requests`; an empty batch counts as mixed.
    #[must_use]
    pub fn of(requests: &[ProvisioningRequest]) -> Self {
        let creates = requests
            .iter()
            .filter(|request| matches!(request, ProvisioningRequest::Create(_)))
            .count();
        match creates {
            0 if !requests.is_empty() => Self::Clone,
            n if n == requests.len() && n > 0 => Self::Create,
            _ => Self::Mixed,
        }
    }
}

/// Outcome of a batch run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchReport {
    /// Per-request results in request order.
    pub results: Vec<ProvisioningResult>,
    /// Number of requests.
    pub total: usize,
    /// Requests that produced a VM.
    pub successful: usize,
    /// Requests that failed.
    pub failed: usize,
}

/// Runs requests one after another through a [`Provisioner`].
///
/// A failing request never stops the batch; it is reported as a
/// [`LifecycleStatus::Failed`] result with identifier `0`.
pub struct BatchExecutor<'p, C, A> {
    provisioner: &'p Provisioner<C, A>,
}

impl<'p, C, A> BatchExecutor<'p, C, A>
where
    C: ControlPlane,
    A: AuditSink,
{
    /// Wraps `provisioner`.
    #[must_use]
    pub const fn new(provisioner: &'p Provisioner<C, A>) -> Self {
        Self { provisioner }
    }

    /// Runs `requests` in order and emits one aggregate audit record.
    pub async fn run_batch(&self, requests: &[ProvisioningRequest]) -> BatchReport {
        info!(total = requests.len(), "batch started");
        let mut results = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            let result = match self.provisioner.provision(request).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(index, name = request.name(), error = %err, "batch item failed");
                    ProvisioningResult {
                        vmid: 0,
                        name: request.name().to_owned(),
                        node: String::new(),
                        status: LifecycleStatus::Failed,
                        message: err.to_string(),
                        task_id: None,
                    }
                }
            };
            results.push(result);
        }

        let successful = results
            .iter()
            .filter(|result| result.status.is_success())
            .count();
        let total = results.len();
        let failed = total.saturating_sub(successful);
        info!(total, successful, failed, "batch finished");

        self.emit_audit(BatchKind::of(requests), &results, successful, failed);
        BatchReport {
            results,
            total,
            successful,
            failed,
        }
    }

    fn emit_audit(
        &self,
        kind: BatchKind,
        results: &[ProvisioningResult],
        successful: usize,
        failed: usize,
    ) {
        let entry = BatchEntry {
            status: if failed == 0 {
                AuditStatus::Success
            } else {
                AuditStatus::Partial
            },
            summary: BatchSummary::new(results.len(), successful, failed),
            operations: results
                .iter()
                .map(|result| BatchOperation {
                    vm_name: result.name.clone(),
                    vm_id: result.vmid,
                    status: result.status,
                    message: result.message.clone(),
                })
                .collect(),
        };
        let event = match kind {
            BatchKind::Create => AuditEvent::BatchCreate(entry),
            BatchKind::Clone => AuditEvent::BatchClone(entry),
            BatchKind::Mixed => AuditEvent::BatchMixed(entry),
        };
        audit::emit(
            self.provisioner.audit_sink(),
            &AuditRecord::new(self.provisioner.actor(), event),
        );
    }
}
