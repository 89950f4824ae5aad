//! BDD scenarios for provisioning and batch runs.

use rstest_bdd_macros::scenario;
use vmforge::BatchReport;

use super::test_helpers::{Cluster, ProvisionOutcome, cluster, outcome, report};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Clone a template and start the new VM"
)]
fn scenario_clone_and_start(cluster: Cluster, outcome: ProvisionOutcome) {
    let _ = (cluster, outcome);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Keep a cloned VM that fails to start"
)]
fn scenario_start_failure(cluster: Cluster, outcome: ProvisionOutcome) {
    let _ = (cluster, outcome);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reject identifiers outside the managed range"
)]
fn scenario_out_of_range(cluster: Cluster, outcome: ProvisionOutcome) {
    let _ = (cluster, outcome);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Report a missing template"
)]
fn scenario_missing_template(cluster: Cluster, outcome: ProvisionOutcome) {
    let _ = (cluster, outcome);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Create a VM from scratch"
)]
fn scenario_create(cluster: Cluster, outcome: ProvisionOutcome) {
    let _ = (cluster, outcome);
}

#[scenario(
    path = "tests/features/batch.feature",
    name = "Isolate failures inside a mixed batch"
)]
fn scenario_mixed_batch(cluster: Cluster, report: BatchReport) {
    let _ = (cluster, report);
}

#[scenario(
    path = "tests/features/batch.feature",
    name = "Classify a batch of clones"
)]
fn scenario_clone_batch(cluster: Cluster, report: BatchReport) {
    let _ = (cluster, report);
}
