//! Provisioning orchestration: clone or create, wait, customise, start.
//!
//! Each request runs strictly in sequence with no retries at this layer:
//!
//! 1. resolve the target node (and the source template for clones);
//! 2. allocate and range-check the VM identifier;
//! 3. submit the clone or create task and wait for it to settle;
//! 4. for clones, apply overrides and the cloud-init payload;
//! 5. optionally start the VM;
//! 6. emit an audit record, whatever the outcome.
//!
//! Failures after the VM exists surface as
//! [`ProvisionError::PartiallyProvisioned`] so callers can tell "never
//! provisioned" apart from "provisioned, not fully configured".

mod error;
mod options;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{
    self, AuditEvent, AuditRecord, AuditSink, AuditStatus, CloneConfiguration, CloneEntry,
    CreateConfiguration, CreationEntry, OutcomeFields, SourceTemplate,
};
use crate::config::ProvisionConfig;
use crate::control_plane::{ControlPlane, ControlPlaneError, Node, TaskHandle, Upid};
use crate::guest_init::{
    CloudInitConfig, SnippetStore, native_user_params, network_params, render_user_data,
    snippet_params,
};
use crate::request::{
    CloneRequest, CreateRequest, ProvisioningRequest, validate_clone_request,
    validate_create_request,
};
use crate::task::{TaskOutcome, TaskWaiter};

pub use error::{ErrorKind, PartialProvision, ProvisionError, ProvisionStage};

/// Lifecycle state reported for a provisioning request.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// The VM exists and was not started.
    Created,
    /// The VM exists and a start was submitted.
    Started,
    /// No VM was produced.
    Failed,
}

impl LifecycleStatus {
    /// Returns `true` when a VM was produced.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Started)
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => formatter.write_str("created"),
            Self::Started => formatter.write_str("started"),
            Self::Failed => formatter.write_str("failed"),
        }
    }
}

/// Result of one provisioning request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProvisioningResult {
    /// VM identifier (`0` when none was assigned).
    pub vmid: u32,
    /// VM name.
    pub name: String,
    /// Node hosting the VM.
    pub node: String,
    /// Lifecycle state.
    pub status: LifecycleStatus,
    /// Human readable summary.
    pub message: String,
    /// Task identifier of the clone or create submission.
    pub task_id: Option<String>,
}

/// What a run learned before it finished, kept for the audit record.
#[derive(Debug, Default)]
struct Progress {
    vmid: Option<u32>,
    node: Option<Node>,
    template_name: Option<String>,
    task: Option<Upid>,
}

/// Sequences clone-or-create requests against a [`ControlPlane`].
pub struct Provisioner<C, A> {
    control_plane: C,
    audit: A,
    config: ProvisionConfig,
    waiter: TaskWaiter,
    actor: String,
    snippets: Option<Arc<dyn SnippetStore>>,
}

impl<C, A> Provisioner<C, A>
where
    C: ControlPlane,
    A: AuditSink,
{
    /// Creates a provisioner polling tasks at the configured interval.
    #[must_use]
    pub fn new(control_plane: C, audit: A, config: ProvisionConfig) -> Self {
        let waiter = TaskWaiter::new(config.task_poll_interval());
        Self {
            control_plane,
            audit,
            config,
            waiter,
            actor: String::from("vmforge"),
            snippets: None,
        }
    }

    /// Sets the user recorded in audit entries.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Delivers cloud-init payloads as uploaded user-data snippets instead of
    /// native parameters.
    #[must_use]
    pub fn with_snippet_store(mut self, store: Arc<dyn SnippetStore>) -> Self {
        self.snippets = Some(store);
        self
    }

    /// Overrides the task waiter.
    #[must_use]
    pub fn with_task_waiter(mut self, waiter: TaskWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Orchestration settings.
    #[must_use]
    pub const fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// User recorded in audit entries.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub(crate) const fn audit_sink(&self) -> &A {
        &self.audit
    }

    /// Runs either kind of request.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::create_vm`] and [`Provisioner::clone_from_template`].
    pub async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningResult, ProvisionError> {
        match request {
            ProvisioningRequest::Create(create) => self.create_vm(create).await,
            ProvisioningRequest::Clone(clone) => self.clone_from_template(clone).await,
        }
    }

    /// Creates a VM from scratch.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidRequest`] when pre-flight checks
    /// fail, [`ProvisionError::IdentifierOutOfRange`] or
    /// [`ProvisionError::IdentifierInUse`] for unusable identifiers,
    /// [`ProvisionError::OperationFailed`] when the create task fails or
    /// times out, and [`ProvisionError::Connection`] when the hypervisor is
    /// unreachable.
    pub async fn create_vm(
        &self,
        request: &CreateRequest,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let mut progress = Progress::default();
        let outcome = self.run_create(request, &mut progress).await;
        let entry = CreationEntry {
            outcome: audit_outcome(&request.name, request.vmid, &progress, &outcome),
            configuration: CreateConfiguration::from(request),
        };
        audit::emit(
            &self.audit,
            &AuditRecord::new(&self.actor, AuditEvent::VmCreation(entry)),
        );
        outcome
    }

    /// Clones a template into a new VM.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::TemplateNotFound`] or
    /// [`ProvisionError::NotATemplate`] when the source is unusable,
    /// identifier and operation errors as for [`Provisioner::create_vm`], and
    /// [`ProvisionError::PartiallyProvisioned`] when overrides or the
    /// cloud-init payload cannot be applied to the new VM.
    pub async fn clone_from_template(
        &self,
        request: &CloneRequest,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let mut progress = Progress::default();
        let outcome = self.run_clone(request, &mut progress).await;
        let entry = CloneEntry {
            outcome: audit_outcome(&request.name, request.new_vmid, &progress, &outcome),
            source_template: SourceTemplate {
                template_id: request.source_vmid,
                template_name: progress.template_name.clone(),
            },
            configuration: CloneConfiguration::from(request),
        };
        audit::emit(
            &self.audit,
            &AuditRecord::new(&self.actor, AuditEvent::TemplateClone(entry)),
        );
        outcome
    }

    async fn run_create(
        &self,
        request: &CreateRequest,
        progress: &mut Progress,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let report = validate_create_request(request);
        if !report.valid {
            return Err(ProvisionError::InvalidRequest {
                issues: report.issues,
            });
        }
        if let Some(vmid) = request.vmid {
            self.check_range(vmid)?;
        }

        let node = Node::from(
            request
                .node
                .as_deref()
                .unwrap_or(&self.config.default_node),
        );
        progress.node = Some(node.clone());
        let vmid = self.allocate(request.vmid).await?;
        progress.vmid = Some(vmid);

        let params = options::create_params(request, &self.config);
        info!(vmid, node = %node, name = %request.name, "submitting create");
        let handle = self
            .control_plane
            .create_vm(&node, vmid, &params)
            .await
            .map_err(|err| ProvisionError::from_submission("create", vmid, err))?;
        progress.task = Some(handle.upid.clone());
        self.await_task("create", &handle, self.config.create_timeout())
            .await?;
        info!(vmid, node = %node, "create finished");

        let (status, message) = match self
            .start_if_requested(&node, vmid, request.start_on_creation)
            .await
        {
            None => (
                LifecycleStatus::Created,
                format!("VM {vmid} created successfully"),
            ),
            Some(Ok(())) => (
                LifecycleStatus::Started,
                format!("VM {vmid} created and started successfully"),
            ),
            Some(Err(err)) => (
                LifecycleStatus::Created,
                format!("VM {vmid} created but failed to start: {err}"),
            ),
        };
        Ok(ProvisioningResult {
            vmid,
            name: request.name.clone(),
            node: node.to_string(),
            status,
            message,
            task_id: Some(handle.upid.to_string()),
        })
    }

    async fn run_clone(
        &self,
        request: &CloneRequest,
        progress: &mut Progress,
    ) -> Result<ProvisioningResult, ProvisionError> {
        let report = validate_clone_request(request);
        if !report.valid {
            return Err(ProvisionError::InvalidRequest {
                issues: report.issues,
            });
        }
        if let Some(vmid) = request.new_vmid {
            self.check_range(vmid)?;
        }

        let source = request.source_vmid;
        let template_node = self
            .control_plane
            .find_node(source)
            .await?
            .ok_or(ProvisionError::TemplateNotFound { vmid: source })?;
        let template = self
            .control_plane
            .vm_config(&template_node, source)
            .await
            .map_err(|err| match err {
                ControlPlaneError::NotFound(_) => ProvisionError::TemplateNotFound { vmid: source },
                other => ProvisionError::from(other),
            })?;
        progress.template_name = Some(
            template
                .name()
                .map_or_else(|| format!("template-{source}"), str::to_owned),
        );
        if !template.is_template() {
            return Err(ProvisionError::NotATemplate { vmid: source });
        }

        let target_node = request
            .node
            .as_deref()
            .map_or_else(|| template_node.clone(), Node::from);
        progress.node = Some(target_node.clone());
        let vmid = self.allocate(request.new_vmid).await?;
        progress.vmid = Some(vmid);

        let clone_options =
            options::clone_options(request, &self.config, &template_node, &target_node);
        info!(
            source,
            vmid,
            template_node = %template_node,
            target_node = %target_node,
            full = request.full_clone,
            "submitting clone"
        );
        let handle = self
            .control_plane
            .clone_vm(&template_node, source, vmid, &clone_options)
            .await
            .map_err(|err| ProvisionError::from_submission("clone", vmid, err))?;
        progress.task = Some(handle.upid.clone());
        self.await_task("clone", &handle, self.config.clone_timeout())
            .await?;
        info!(vmid, node = %target_node, "clone finished");

        let cloned = ProvisioningResult {
            vmid,
            name: request.name.clone(),
            node: target_node.to_string(),
            status: LifecycleStatus::Created,
            message: format!("VM {vmid} cloned successfully"),
            task_id: Some(handle.upid.to_string()),
        };

        let overrides = options::customization_params(request);
        if !overrides.is_empty()
            && let Err(err) = self
                .control_plane
                .update_config(&target_node, vmid, &overrides)
                .await
        {
            return Err(partial(cloned, ProvisionStage::Customization, err.to_string()));
        }
        if let Some(cloud_init) = &request.cloud_init
            && let Err(reason) = self
                .apply_guest_init(&target_node, vmid, &request.name, cloud_init)
                .await
        {
            return Err(partial(cloned, ProvisionStage::GuestInit, reason));
        }

        let (status, message) = match self
            .start_if_requested(&target_node, vmid, request.start_after_clone)
            .await
        {
            None => (cloned.status, cloned.message),
            Some(Ok(())) => (
                LifecycleStatus::Started,
                format!("VM {vmid} cloned and started successfully"),
            ),
            Some(Err(err)) => (
                LifecycleStatus::Created,
                format!("VM {vmid} cloned successfully but failed to start: {err}"),
            ),
        };
        Ok(ProvisioningResult {
            status,
            message,
            ..cloned
        })
    }

    fn check_range(&self, vmid: u32) -> Result<(), ProvisionError> {
        if self.config.vmid_range().contains(&vmid) {
            return Ok(());
        }
        Err(ProvisionError::IdentifierOutOfRange {
            vmid,
            min: self.config.vmid_min,
            max: self.config.vmid_max,
        })
    }

    async fn allocate(&self, explicit: Option<u32>) -> Result<u32, ProvisionError> {
        let vmid = match explicit {
            Some(vmid) => vmid,
            None => self.control_plane.next_free_id().await?,
        };
        self.check_range(vmid)?;
        Ok(vmid)
    }

    async fn await_task(
        &self,
        operation: &'static str,
        handle: &TaskHandle,
        timeout: Duration,
    ) -> Result<(), ProvisionError> {
        match self.waiter.wait(&self.control_plane, handle, timeout).await {
            TaskOutcome::Succeeded => Ok(()),
            TaskOutcome::Failed(reason) => Err(ProvisionError::OperationFailed {
                operation,
                message: format!("task {} failed: {reason}", handle.upid),
            }),
            TaskOutcome::TimedOut => Err(ProvisionError::OperationFailed {
                operation,
                message: format!(
                    "task {} did not finish within {}s",
                    handle.upid,
                    timeout.as_secs()
                ),
            }),
        }
    }

    /// Submits a start when both the request and the global switch allow it.
    /// The start task is not awaited.
    async fn start_if_requested(
        &self,
        node: &Node,
        vmid: u32,
        requested: bool,
    ) -> Option<Result<(), ControlPlaneError>> {
        if !requested || !self.config.enable_auto_start {
            return None;
        }
        let started = self.control_plane.start_vm(node, vmid).await;
        match &started {
            Ok(handle) => info!(vmid, upid = %handle.upid, "start submitted"),
            Err(err) => warn!(vmid, error = %err, "start failed; VM left stopped"),
        }
        Some(started.map(|_| ()))
    }

    async fn apply_guest_init(
        &self,
        node: &Node,
        vmid: u32,
        hostname: &str,
        cloud_init: &CloudInitConfig,
    ) -> Result<(), String> {
        let params = match &self.snippets {
            Some(store) => {
                let user_data =
                    render_user_data(cloud_init, hostname).map_err(|err| err.to_string())?;
                let volume = store
                    .upload(vmid, &user_data)
                    .map_err(|err| err.to_string())?;
                info!(vmid, volume = %volume, "user-data snippet uploaded");
                snippet_params(cloud_init, &volume)
            }
            None => {
                let mut native = network_params(cloud_init);
                native.extend(native_user_params(cloud_init));
                native
            }
        };
        if params.is_empty() {
            return Ok(());
        }
        self.control_plane
            .update_config(node, vmid, &params)
            .await
            .map_err(|err| err.to_string())
    }
}

fn partial(result: ProvisioningResult, stage: ProvisionStage, reason: String) -> ProvisionError {
    warn!(vmid = result.vmid, %stage, %reason, "VM provisioned but not fully configured");
    ProvisionError::PartiallyProvisioned(Box::new(PartialProvision {
        result,
        stage,
        reason,
    }))
}

fn audit_outcome(
    name: &str,
    requested_vmid: Option<u32>,
    progress: &Progress,
    outcome: &Result<ProvisioningResult, ProvisionError>,
) -> OutcomeFields {
    match outcome {
        Ok(result) => OutcomeFields::from_result(result),
        Err(err) => {
            let mut fields = err.partial_result().map_or_else(
                || {
                    OutcomeFields::failure(
                        name,
                        progress.vmid.or(requested_vmid),
                        progress.node.as_ref().map(ToString::to_string),
                        err.to_string(),
                    )
                },
                OutcomeFields::from_result,
            );
            fields.status = AuditStatus::Failed;
            fields.error = Some(err.to_string());
            if fields.task_id.is_none() {
                fields.task_id = progress.task.as_ref().map(ToString::to_string);
            }
            fields
        }
    }
}
