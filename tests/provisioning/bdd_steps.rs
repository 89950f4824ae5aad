//! Step definitions for the provisioning and batch scenarios.

use rstest_bdd_macros::{given, then, when};
use serde_json::Value;
use vmforge::{
    BatchExecutor, BatchReport, CloneRequest, ControlPlaneError, CreateRequest,
    ProvisioningRequest,
};

use super::test_helpers::{Cluster, ProvisionOutcome, block_on};

#[given("a cluster with template {vmid} on node \"{node}\"")]
fn cluster_with_template(vmid: u32, node: String) -> Cluster {
    let cluster = Cluster::default();
    cluster.plane.add_template(&node, vmid, "ubuntu-24.04");
    cluster
}

#[given("starting VMs fails")]
fn starting_fails(cluster: &Cluster) {
    cluster.plane.fail_start(ControlPlaneError::Api {
        status: 500,
        message: String::from("start failed: lock timeout"),
    });
}

#[when("I clone template {vmid} as \"{name}\" and start it")]
fn clone_and_start(cluster: &Cluster, vmid: u32, name: String) -> ProvisionOutcome {
    let request = CloneRequest {
        start_after_clone: true,
        ..CloneRequest::new(vmid, name)
    };
    let provisioner = cluster.provisioner();
    ProvisionOutcome(block_on(provisioner.clone_from_template(&request)))
}

#[when("I clone template {vmid} as \"{name}\" with identifier {new_vmid}")]
fn clone_with_identifier(
    cluster: &Cluster,
    vmid: u32,
    name: String,
    new_vmid: u32,
) -> ProvisionOutcome {
    let request = CloneRequest {
        new_vmid: Some(new_vmid),
        ..CloneRequest::new(vmid, name)
    };
    let provisioner = cluster.provisioner();
    ProvisionOutcome(block_on(provisioner.clone_from_template(&request)))
}

#[when("I create a VM named \"{name}\"")]
fn create_named(cluster: &Cluster, name: String) -> ProvisionOutcome {
    let provisioner = cluster.provisioner();
    ProvisionOutcome(block_on(
        provisioner.create_vm(&CreateRequest::named(name)),
    ))
}

#[when("I run a mixed batch that names a missing template")]
fn run_mixed_batch(cluster: &Cluster) -> BatchReport {
    run_batch(
        cluster,
        vec![
            ProvisioningRequest::Clone(CloneRequest::new(9000, "batch-a")),
            ProvisioningRequest::Clone(CloneRequest::new(4242, "batch-b")),
            ProvisioningRequest::Create(CreateRequest::named("batch-c")),
        ],
    )
}

#[when("I run a batch that clones template {vmid} twice")]
fn run_clone_batch(cluster: &Cluster, vmid: u32) -> BatchReport {
    run_batch(
        cluster,
        vec![
            ProvisioningRequest::Clone(CloneRequest::new(vmid, "batch-a")),
            ProvisioningRequest::Clone(CloneRequest::new(vmid, "batch-b")),
        ],
    )
}

fn run_batch(cluster: &Cluster, requests: Vec<ProvisioningRequest>) -> BatchReport {
    let provisioner = cluster.provisioner();
    block_on(BatchExecutor::new(&provisioner).run_batch(&requests))
}

#[then("the VM {vmid} is reported as \"{status}\"")]
fn vm_reported_as(outcome: &ProvisionOutcome, vmid: u32, status: String) {
    let result = outcome
        .0
        .as_ref()
        .unwrap_or_else(|err| panic!("expected a provisioned VM, got: {err}"));
    assert_eq!(result.vmid, vmid);
    assert_eq!(result.status.to_string(), status);
}

#[then("provisioning fails with kind \"{kind}\"")]
fn provisioning_fails_with(outcome: &ProvisionOutcome, kind: String) {
    let Err(err) = &outcome.0 else {
        panic!("expected a failure, got: {:?}", outcome.0);
    };
    let rendered = serde_json::to_value(err.kind())
        .unwrap_or_else(|error| panic!("error kind should serialise: {error}"));
    assert_eq!(rendered, Value::String(kind), "error was: {err}");
}

#[then("no VM was cloned")]
fn nothing_cloned(cluster: &Cluster) {
    assert!(
        cluster.plane.clones().is_empty(),
        "unexpected clones: {:?}",
        cluster.plane.clones()
    );
}

#[then("the batch reports {total} requests with {successful} successful and {failed} failed")]
fn batch_counts(report: &BatchReport, total: usize, successful: usize, failed: usize) {
    assert_eq!(
        (report.total, report.successful, report.failed),
        (total, successful, failed),
        "results: {:?}",
        report.results
    );
    assert_eq!(report.results.len(), total);
}

#[then("the audit log holds a \"{operation}\" record with status \"{status}\"")]
fn audit_record(cluster: &Cluster, operation: String, status: String) {
    let records: Vec<Value> = cluster
        .audit
        .records_json()
        .into_iter()
        .filter(|record| record["operation"] == operation.as_str())
        .collect();
    let [record] = records.as_slice() else {
        panic!("expected exactly one {operation} record, got {records:?}");
    };
    assert_eq!(record["status"], Value::String(status));
    assert_eq!(record["username"], "root@pam");
}
