//! Fixtures shared by the provisioning scenarios.
//!
//! Tasks complete on their first poll and the runtime clock is paused, so
//! the scenarios never wait on real time.

use std::future::Future;

use rstest::fixture;
use tokio::runtime::Builder;
use vmforge::test_support::{RecordingAuditSink, ScriptedControlPlane, provision_config};
use vmforge::{BatchReport, ProvisionError, Provisioner, ProvisioningResult};

/// Scripted cluster and the audit records it produced.
#[derive(Clone, Debug, Default)]
pub struct Cluster {
    pub plane: ScriptedControlPlane,
    pub audit: RecordingAuditSink,
}

impl Cluster {
    pub fn provisioner(&self) -> Provisioner<ScriptedControlPlane, RecordingAuditSink> {
        Provisioner::new(self.plane.clone(), self.audit.clone(), provision_config())
            .with_actor("root@pam")
    }
}

/// Outcome of a single provisioning request.
#[derive(Clone, Debug)]
pub struct ProvisionOutcome(pub Result<ProvisioningResult, ProvisionError>);

#[fixture]
pub fn cluster() -> Cluster {
    Cluster::default()
}

#[fixture]
pub fn outcome() -> ProvisionOutcome {
    ProvisionOutcome(Err(ProvisionError::Unexpected(String::from(
        "no request was run",
    ))))
}

#[fixture]
pub fn report() -> BatchReport {
    BatchReport {
        results: Vec::new(),
        total: 0,
        successful: 0,
        failed: 0,
    }
}

/// Drives `future` on a single-threaded runtime with a paused clock.
pub fn block_on<F: Future>(future: F) -> F::Output {
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap_or_else(|err| panic!("scenario runtime should start: {err}"))
        .block_on(future)
}
