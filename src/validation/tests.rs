//! Unit tests for the validation state machine.

use std::time::Duration;

use rstest::{fixture, rstest};
use tokio::time::Instant;

use super::*;
use crate::test_support::{
    RecordingAuditSink, ScriptedControlPlane, ScriptedProber, guest_interface,
};

type Engine = ValidationEngine<ScriptedControlPlane, ScriptedProber, RecordingAuditSink>;

struct Harness {
    control_plane: ScriptedControlPlane,
    prober: ScriptedProber,
    audit: RecordingAuditSink,
}

impl Harness {
    fn engine(&self) -> Engine {
        ValidationEngine::new(
            self.control_plane.clone(),
            self.prober.clone(),
            self.audit.clone(),
            ValidationSettings::default(),
        )
        .with_actor("root@pam")
    }
}

#[fixture]
fn running_vm() -> Harness {
    let control_plane = ScriptedControlPlane::new();
    control_plane.add_vm("pve", 201, "web-01", "running");
    Harness {
        control_plane,
        prober: ScriptedProber::new(),
        audit: RecordingAuditSink::new(),
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn reachable_linux_guest_is_healthy(running_vm: Harness) {
    running_vm.control_plane.set_guest_ipv4(201, "10.0.0.5");
    let harness = Harness {
        prober: ScriptedProber::new().with_open(22),
        ..running_vm
    };

    let result = harness.engine().validate(201, &OsType::Linux, None).await;

    assert_eq!(result.status, HealthStatus::Healthy);
    assert_eq!(result.ip_address.as_deref(), Some("10.0.0.5"));
    assert_eq!(result.message, "All validation checks passed");
    let names: Vec<&str> = result.checks.keys().map(String::as_str).collect();
    assert_eq!(names, ["proxmox_status", "ssh_port"]);
    assert_eq!(
        harness.prober.probes(),
        [(String::from("10.0.0.5"), 22)]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn refused_ssh_degrades(running_vm: Harness) {
    running_vm.control_plane.set_guest_ipv4(201, "10.0.0.5");

    let result = running_vm.engine().validate(201, &OsType::Linux, None).await;

    assert_eq!(result.status, HealthStatus::Degraded);
    assert_eq!(result.message, "Some validation checks failed");
    let ssh = result
        .checks
        .get("ssh_port")
        .unwrap_or_else(|| panic!("ssh check missing: {result:?}"));
    assert!(!ssh.passed);
    assert_eq!(ssh.details["failure"], "refused");
    assert_eq!(ssh.message, "Port 22 is closed or refusing connections");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn windows_guest_probes_rdp(running_vm: Harness) {
    running_vm.control_plane.set_guest_ipv4(201, "10.0.0.9");
    let harness = Harness {
        prober: ScriptedProber::new().with_open(3389),
        ..running_vm
    };

    let result = harness.engine().validate(201, &OsType::Windows, None).await;

    assert_eq!(result.status, HealthStatus::Healthy);
    assert!(result.checks.contains_key("rdp_port"));
    assert_eq!(harness.prober.probes(), [(String::from("10.0.0.9"), 3389)]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stopped_vm_is_unhealthy_without_further_checks(running_vm: Harness) {
    running_vm.control_plane.set_vm_status(201, "stopped", None);
    running_vm.control_plane.set_guest_ipv4(201, "10.0.0.5");

    let result = running_vm.engine().validate(201, &OsType::Linux, None).await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert_eq!(result.checks.len(), 1);
    let liveness = result
        .checks
        .get(LIVENESS_CHECK)
        .unwrap_or_else(|| panic!("liveness check missing: {result:?}"));
    assert_eq!(liveness.message, "VM is not running (status: stopped)");
    assert!(!running_vm.control_plane.calls().contains(&"guest_interfaces"));
    assert!(running_vm.prober.probes().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn unknown_vm_is_unhealthy(running_vm: Harness) {
    let result = running_vm.engine().validate(404, &OsType::Linux, None).await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert_eq!(result.message, "VM 404 not found");
    assert!(result.ip_address.is_none());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn missing_address_degrades_after_wait(running_vm: Harness) {
    let start = Instant::now();

    let result = running_vm.engine().validate(201, &OsType::Linux, None).await;

    assert_eq!(result.status, HealthStatus::Degraded);
    assert_eq!(result.ip_address, None);
    assert_eq!(result.message, "VM is running but no IP address assigned");
    assert!(!result.checks.contains_key("ssh_port"));
    assert_eq!(start.elapsed(), Duration::from_secs(120));
    let queries = running_vm
        .control_plane
        .calls()
        .iter()
        .filter(|call| **call == "guest_interfaces")
        .count();
    assert_eq!(queries, 13);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn link_local_only_counts_as_no_address(running_vm: Harness) {
    running_vm.control_plane.set_guest_interfaces(
        201,
        Some(vec![guest_interface("eth0", &["169.254.3.7"])]),
    );

    let result = running_vm.engine().validate(201, &OsType::Linux, None).await;

    assert_eq!(result.status, HealthStatus::Degraded);
    assert!(running_vm.prober.probes().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn deadline_records_error_check(running_vm: Harness) {
    let start = Instant::now();

    let result = running_vm
        .engine()
        .validate(201, &OsType::Linux, Some(Duration::from_secs(30)))
        .await;

    assert_eq!(result.status, HealthStatus::Unhealthy);
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    let names: Vec<&str> = result.checks.keys().map(String::as_str).collect();
    assert_eq!(names, ["proxmox_status", "error"]);
    let error = result
        .checks
        .get(ERROR_CHECK)
        .unwrap_or_else(|| panic!("error check missing: {result:?}"));
    assert_eq!(
        error.message,
        "Validation failed: validation timed out after 30s"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn every_run_is_audited(running_vm: Harness) {
    running_vm.control_plane.set_guest_ipv4(201, "10.0.0.5");

    let result = running_vm.engine().validate(201, &OsType::Linux, None).await;

    let records = running_vm.audit.records_json();
    assert_eq!(records.len(), 1);
    let record = records
        .first()
        .unwrap_or_else(|| panic!("audit record missing"));
    assert_eq!(record["operation"], "validation");
    assert_eq!(record["username"], "root@pam");
    assert_eq!(record["vm_id"], 201);
    assert_eq!(record["vm_name"], "web-01");
    assert_eq!(record["validation_status"], result.status.to_string());
    assert_eq!(record["ip_address"], "10.0.0.5");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn audit_failure_does_not_change_result(running_vm: Harness) {
    running_vm.control_plane.set_guest_ipv4(201, "10.0.0.5");
    running_vm.audit.fail_writes();
    let harness = Harness {
        prober: ScriptedProber::new().with_open(22),
        ..running_vm
    };

    let result = harness.engine().validate(201, &OsType::Linux, None).await;

    assert!(result.is_healthy());
    assert!(harness.audit.records().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn quick_check_reports_liveness_only(running_vm: Harness) {
    let engine = running_vm.engine();
    assert!(engine.quick_check(201).await);
    assert!(!engine.quick_check(404).await);
    running_vm.control_plane.set_vm_status(201, "stopped", None);
    assert!(!engine.quick_check(201).await);
}
