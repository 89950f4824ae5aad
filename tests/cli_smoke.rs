//! Behavioural smoke tests for the CLI entrypoint.
//!
//! Only paths that never contact a hypervisor are exercised here.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn request_file(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("request.json");
    std::fs::write(&path, body).unwrap_or_else(|err| panic!("write request: {err}"));
    path
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("vmforge");
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("clone")
            .and(predicate::str::contains("batch"))
            .and(predicate::str::contains("validate"))
            .and(predicate::str::contains("check"))
            .and(predicate::str::contains("templates"))
            .and(predicate::str::contains("cluster")),
    );
}

#[test]
fn check_accepts_a_sound_create_request() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = request_file(&dir, r#"{"name": "web-01", "memory": 4096}"#);

    let mut cmd = cargo_bin_cmd!("vmforge");
    cmd.arg("check").arg("--file").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""valid": true"#));
}

#[test]
fn check_lists_issues_and_fails() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = request_file(&dir, r#"{"name": "web-01", "memory": 256, "disk_size": 4}"#);

    let mut cmd = cargo_bin_cmd!("vmforge");
    cmd.arg("check").arg("--file").arg(&path);
    cmd.assert().code(1).stdout(
        predicate::str::contains("memory must be at least 512 MB")
            .and(predicate::str::contains("disk_size must be at least 8 GB")),
    );
}

#[test]
fn check_reports_unreadable_input() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let missing = dir.path().join("missing.json");

    let mut cmd = cargo_bin_cmd!("vmforge");
    cmd.arg("check").arg("--file").arg(&missing);
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn unreachable_cluster_still_writes_one_audit_record() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = request_file(&dir, r#"{"name": "web-01"}"#);
    let audit_log = dir.path().join("audit").join("audit.log");

    let mut cmd = cargo_bin_cmd!("vmforge");
    cmd.current_dir(dir.path())
        .env("PVE_HOST", "127.0.0.1")
        .env("PVE_PORT", "1")
        .env("PVE_TOKEN_ID", "ci")
        .env("PVE_TOKEN_SECRET", "5f0c")
        .env("VMFORGE_DEFAULT_NODE", "pve")
        .env("VMFORGE_AUDIT_LOG_PATH", &audit_log)
        .env("VMFORGE_ACTOR", "ci@pve")
        .arg("create")
        .arg("--file")
        .arg(&path);
    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains(r#""kind": "unavailable""#));

    let log = std::fs::read_to_string(&audit_log)
        .unwrap_or_else(|err| panic!("audit log should exist: {err}"));
    let records: Vec<serde_json::Value> = log
        .lines()
        .map(|line| serde_json::from_str(line).unwrap_or_else(|err| panic!("record: {err}")))
        .collect();
    assert_eq!(records.len(), 1, "{log}");
    let record = records
        .first()
        .unwrap_or_else(|| panic!("audit record missing"));
    assert_eq!(record["operation"], "vm_creation");
    assert_eq!(record["status"], "failed");
    assert_eq!(record["username"], "ci@pve");
}

#[test]
fn cluster_reports_unreachable_api_inline() {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));

    let mut cmd = cargo_bin_cmd!("vmforge");
    cmd.current_dir(dir.path())
        .env("PVE_HOST", "127.0.0.1")
        .env("PVE_PORT", "1")
        .env("PVE_TOKEN_ID", "ci")
        .env("PVE_TOKEN_SECRET", "5f0c")
        .env("VMFORGE_DEFAULT_NODE", "pve")
        .arg("cluster");
    cmd.assert().code(1).stdout(
        predicate::str::contains(r#""connected": false"#)
            .and(predicate::str::contains(r#""host": "127.0.0.1""#)),
    );
}
