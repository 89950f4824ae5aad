//! Post-deployment validation of a provisioned VM.
//!
//! A run walks a small state machine: liveness, then address discovery
//! through the guest agent, then one TCP probe of the remote access port.
//! A failed liveness check ends the run as [`HealthStatus::Unhealthy`];
//! anything that fails later degrades the result instead. The whole run is
//! bounded by a deadline and never returns an error.

mod address;
mod probe;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEvent, AuditRecord, AuditSink, ValidationEntry};
use crate::config::ProvisionConfig;
use crate::control_plane::{ControlPlane, ControlPlaneError, Node, VmStatus};
use crate::request::OsType;

pub use probe::{PortProber, ProbeFailure, ProbeFuture, ProbeReport, TcpPortProber};

/// Name of the liveness check.
pub const LIVENESS_CHECK: &str = "proxmox_status";
/// Name of the synthetic check recorded when the run itself fails.
pub const ERROR_CHECK: &str = "error";

/// Aggregate health of a validated VM.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every required check passed.
    Healthy,
    /// The VM runs but is not fully reachable.
    Degraded,
    /// The VM is not running or validation could not complete.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => formatter.write_str("healthy"),
            Self::Degraded => formatter.write_str("degraded"),
            Self::Unhealthy => formatter.write_str("unhealthy"),
        }
    }
}

/// One named check within a validation run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValidationCheck {
    /// Whether the check passed.
    pub passed: bool,
    /// Whether a failure affects the aggregate status.
    pub required: bool,
    /// Human readable outcome.
    pub message: String,
    /// Check specific data.
    #[serde(default)]
    pub details: Value,
}

impl ValidationCheck {
    fn required(passed: bool, message: impl Into<String>, details: Value) -> Self {
        Self {
            passed,
            required: true,
            message: message.into(),
            details,
        }
    }
}

/// Result of a validation run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ValidationResult {
    /// Validated VM.
    pub vmid: u32,
    /// Aggregate health.
    pub status: HealthStatus,
    /// Routable guest address, when one was found.
    pub ip_address: Option<String>,
    /// Checks in execution order.
    pub checks: IndexMap<String, ValidationCheck>,
    /// Summary.
    pub message: String,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
}

impl ValidationResult {
    /// Returns `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Timing and port settings for validation runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValidationSettings {
    /// Deadline for a whole run unless the caller overrides it.
    pub timeout: Duration,
    /// How long to wait for the guest agent to report an address.
    pub address_wait: Duration,
    /// Delay between guest agent queries.
    pub address_retry: Duration,
    /// Port probed on Linux and other guests.
    pub ssh_port: u16,
    /// Port probed on Windows guests.
    pub rdp_port: u16,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            address_wait: Duration::from_secs(120),
            address_retry: Duration::from_secs(10),
            ssh_port: 22,
            rdp_port: 3389,
        }
    }
}

impl From<&ProvisionConfig> for ValidationSettings {
    fn from(config: &ProvisionConfig) -> Self {
        Self {
            timeout: config.validation_timeout(),
            address_wait: config.address_wait(),
            address_retry: config.address_retry(),
            ssh_port: config.ssh_port,
            rdp_port: config.rdp_port,
        }
    }
}

impl ValidationSettings {
    /// Access check name and port for `os_type`.
    fn access_port(&self, os_type: &OsType) -> (&'static str, u16) {
        match os_type {
            OsType::Windows => ("rdp_port", self.rdp_port),
            OsType::Linux | OsType::Other(_) => ("ssh_port", self.ssh_port),
        }
    }
}

/// State a run accumulates; survives the deadline cutting the run short.
#[derive(Debug, Default)]
struct Observed {
    checks: IndexMap<String, ValidationCheck>,
    vm_name: Option<String>,
}

/// How far a run got before it stopped.
#[derive(Debug)]
struct Verdict {
    status: HealthStatus,
    ip_address: Option<String>,
    message: String,
}

impl Verdict {
    fn new(status: HealthStatus, ip_address: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            ip_address,
            message: message.into(),
        }
    }
}

/// Runs validation against a [`ControlPlane`] with a [`PortProber`].
pub struct ValidationEngine<C, P, A> {
    control_plane: C,
    prober: P,
    audit: A,
    settings: ValidationSettings,
    actor: String,
}

impl<C, P, A> ValidationEngine<C, P, A>
where
    C: ControlPlane,
    P: PortProber,
    A: AuditSink,
{
    /// Creates an engine with the given collaborators.
    #[must_use]
    pub fn new(control_plane: C, prober: P, audit: A, settings: ValidationSettings) -> Self {
        Self {
            control_plane,
            prober,
            audit,
            settings,
            actor: String::from("vmforge"),
        }
    }

    /// Sets the user recorded in audit entries.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validates `vmid`, probing the access port for `os_type`.
    ///
    /// `timeout` overrides the configured deadline for this run.
    pub async fn validate(
        &self,
        vmid: u32,
        os_type: &OsType,
        timeout: Option<Duration>,
    ) -> ValidationResult {
        let budget = timeout.unwrap_or(self.settings.timeout);
        info!(vmid, os_type = %os_type, budget_secs = budget.as_secs(), "validation started");

        let mut observed = Observed::default();
        let verdict = match tokio::time::timeout(budget, self.run(vmid, os_type, &mut observed))
            .await
        {
            Ok(verdict) => verdict,
            Err(_) => {
                let reason = format!("validation timed out after {}s", budget.as_secs());
                warn!(vmid, %reason, "validation aborted");
                observed.checks.insert(
                    ERROR_CHECK.to_owned(),
                    ValidationCheck::required(
                        false,
                        format!("Validation failed: {reason}"),
                        json!({ "error": reason }),
                    ),
                );
                Verdict::new(
                    HealthStatus::Unhealthy,
                    None,
                    format!("Validation failed: {reason}"),
                )
            }
        };

        let result = ValidationResult {
            vmid,
            status: verdict.status,
            ip_address: verdict.ip_address,
            checks: observed.checks,
            message: verdict.message,
            timestamp: Utc::now(),
        };
        info!(vmid, status = %result.status, "validation finished");
        audit::emit(
            &self.audit,
            &AuditRecord::new(
                &self.actor,
                AuditEvent::Validation(ValidationEntry::from_result(&result, observed.vm_name)),
            ),
        );
        result
    }

    /// Liveness only: `true` when the VM exists and is running.
    pub async fn quick_check(&self, vmid: u32) -> bool {
        let Ok(Some(node)) = self.control_plane.find_node(vmid).await else {
            return false;
        };
        self.control_plane
            .vm_status(&node, vmid)
            .await
            .is_ok_and(|status| status.is_running())
    }

    async fn run(&self, vmid: u32, os_type: &OsType, observed: &mut Observed) -> Verdict {
        let Some(node) = self.check_liveness(vmid, observed).await else {
            let message = observed
                .checks
                .get(LIVENESS_CHECK)
                .map_or_else(|| format!("VM {vmid} not found"), |check| check.message.clone());
            return Verdict::new(HealthStatus::Unhealthy, None, message);
        };

        let Some(ip) = self.wait_for_address(&node, vmid).await else {
            warn!(vmid, "no routable address reported by the guest agent");
            return Verdict::new(
                HealthStatus::Degraded,
                None,
                "VM is running but no IP address assigned",
            );
        };

        let (check_name, port) = self.settings.access_port(os_type);
        let report = self.prober.probe(&ip, port).await;
        debug!(vmid, %ip, port, passed = report.passed, "access port probed");
        let details = serde_json::to_value(&report).unwrap_or(Value::Null);
        observed.checks.insert(
            check_name.to_owned(),
            ValidationCheck::required(report.passed, report.message, details),
        );

        let all_passed = observed
            .checks
            .values()
            .filter(|check| check.required)
            .all(|check| check.passed);
        if all_passed {
            Verdict::new(HealthStatus::Healthy, Some(ip), "All validation checks passed")
        } else {
            Verdict::new(
                HealthStatus::Degraded,
                Some(ip),
                "Some validation checks failed",
            )
        }
    }

    /// Records the liveness check; returns the node when the VM is running.
    async fn check_liveness(&self, vmid: u32, observed: &mut Observed) -> Option<Node> {
        let node = match self.control_plane.find_node(vmid).await {
            Ok(Some(node)) => node,
            Ok(None) => return fail_liveness(vmid, observed, not_found(vmid)),
            Err(err) => return fail_liveness(vmid, observed, status_error(&err)),
        };
        let status = match self.control_plane.vm_status(&node, vmid).await {
            Ok(status) => status,
            Err(ControlPlaneError::NotFound(_)) => {
                return fail_liveness(vmid, observed, not_found(vmid));
            }
            Err(err) => return fail_liveness(vmid, observed, status_error(&err)),
        };
        observed.vm_name.clone_from(&status.name);
        let check = liveness_check(&node, &status);
        if !check.passed {
            return fail_liveness(vmid, observed, check);
        }
        observed.checks.insert(LIVENESS_CHECK.to_owned(), check);
        Some(node)
    }

    /// Polls the guest agent until a routable IPv4 address appears or the
    /// wait budget runs out.
    async fn wait_for_address(&self, node: &Node, vmid: u32) -> Option<String> {
        let deadline = Instant::now() + self.settings.address_wait;
        loop {
            match self.control_plane.guest_interfaces(node, vmid).await {
                Ok(Some(interfaces)) => {
                    if let Some(ip) = address::routable_ipv4(&interfaces) {
                        info!(vmid, %ip, "guest address found");
                        return Some(ip.to_string());
                    }
                    debug!(vmid, "guest agent reported no routable address yet");
                }
                Ok(None) => debug!(vmid, "guest agent not answering yet"),
                Err(err) => debug!(vmid, error = %err, "guest interface query failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(self.settings.address_retry.min(deadline - now)).await;
        }
    }
}

fn liveness_check(node: &Node, status: &VmStatus) -> ValidationCheck {
    let details = json!({
        "status": status.status,
        "uptime": status.uptime,
        "node": node.as_str(),
    });
    if status.is_running() {
        ValidationCheck::required(
            true,
            format!("VM is running (uptime: {}s)", status.uptime.unwrap_or_default()),
            details,
        )
    } else {
        ValidationCheck::required(
            false,
            format!("VM is not running (status: {})", status.status),
            details,
        )
    }
}

fn fail_liveness(vmid: u32, observed: &mut Observed, check: ValidationCheck) -> Option<Node> {
    warn!(vmid, message = %check.message, "liveness check failed");
    observed.checks.insert(LIVENESS_CHECK.to_owned(), check);
    None
}

fn not_found(vmid: u32) -> ValidationCheck {
    ValidationCheck::required(false, format!("VM {vmid} not found"), Value::Null)
}

fn status_error(error: &ControlPlaneError) -> ValidationCheck {
    ValidationCheck::required(
        false,
        format!("Failed to check VM status: {error}"),
        json!({ "error": error.to_string() }),
    )
}

#[cfg(test)]
mod tests;
