//! Unit tests for configuration loading and validation.

use rstest::*;
use vmforge::config::{ConfigError, ProvisionConfig, ProxmoxConfig};
use vmforge::test_support::{EnvGuard, provision_config};

#[fixture]
fn valid_proxmox() -> ProxmoxConfig {
    ProxmoxConfig {
        host: String::from("pve.lab.example"),
        port: 8006,
        user: String::from("root@pam"),
        password: Some(String::from("hunter2")),
        token_id: None,
        token_secret: None,
        verify_ssl: false,
    }
}

fn assert_actionable(error: &ConfigError, env_var: &str, toml_key: &str) {
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("vmforge.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn proxmox_validation_accepts_password_credentials(valid_proxmox: ProxmoxConfig) {
    assert!(valid_proxmox.validate().is_ok());
}

#[rstest]
fn proxmox_validation_accepts_token_without_password(valid_proxmox: ProxmoxConfig) {
    let cfg = ProxmoxConfig {
        password: None,
        token_id: Some(String::from("vmforge")),
        token_secret: Some(String::from("0d2b6c1e")),
        ..valid_proxmox
    };

    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.api_token(), Some(("vmforge", "0d2b6c1e")));
}

#[rstest]
#[case::host(|cfg: &mut ProxmoxConfig| cfg.host = String::from("  "), "PVE_HOST", "host")]
#[case::user(|cfg: &mut ProxmoxConfig| cfg.user = String::new(), "PVE_USER", "user")]
#[case::credentials(|cfg: &mut ProxmoxConfig| cfg.password = None, "PVE_PASSWORD", "password")]
fn proxmox_validation_names_the_missing_source(
    valid_proxmox: ProxmoxConfig,
    #[case] mutate: fn(&mut ProxmoxConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = valid_proxmox;
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");

    assert!(matches!(error, ConfigError::MissingField(_)), "{error}");
    assert_actionable(&error, env_var, toml_key);
}

#[rstest]
fn half_configured_token_falls_back_to_password(valid_proxmox: ProxmoxConfig) {
    let cfg = ProxmoxConfig {
        token_id: Some(String::from("vmforge")),
        token_secret: Some(String::from(" ")),
        ..valid_proxmox
    };

    assert_eq!(cfg.api_token(), None);
    assert!(cfg.validate().is_ok());
}

#[rstest]
fn base_url_targets_the_json_api(valid_proxmox: ProxmoxConfig) {
    let cfg = ProxmoxConfig {
        host: String::from(" 10.0.0.2 "),
        port: 8443,
        ..valid_proxmox
    };

    assert_eq!(cfg.base_url(), "https://10.0.0.2:8443/api2/json");
}

#[test]
fn provision_defaults_validate() {
    let cfg = provision_config();

    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.vmid_range(), 150..=999);
    assert_eq!(cfg.clone_timeout().as_secs(), 300);
    assert_eq!(cfg.address_wait().as_secs(), 120);
}

#[rstest]
#[case::node(
    |cfg: &mut ProvisionConfig| cfg.default_node = String::new(),
    "VMFORGE_DEFAULT_NODE",
    "default_node"
)]
#[case::bridge(
    |cfg: &mut ProvisionConfig| cfg.default_bridge = String::new(),
    "VMFORGE_DEFAULT_BRIDGE",
    "default_bridge"
)]
#[case::range(
    |cfg: &mut ProvisionConfig| cfg.vmid_min = 1000,
    "VMFORGE_VMID_MIN",
    "vmid_min"
)]
#[case::poll(
    |cfg: &mut ProvisionConfig| cfg.task_poll_interval_secs = 0,
    "VMFORGE_TASK_POLL_INTERVAL_SECS",
    "task_poll_interval_secs"
)]
#[case::audit(
    |cfg: &mut ProvisionConfig| cfg.audit_log_path = String::new(),
    "VMFORGE_AUDIT_LOG_PATH",
    "audit_log_path"
)]
fn provision_validation_names_the_offending_source(
    #[case] mutate: fn(&mut ProvisionConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = provision_config();
    mutate(&mut cfg);

    let error = cfg.validate().expect_err("validation should fail");

    assert_actionable(&error, env_var, toml_key);
}

#[tokio::test]
async fn proxmox_config_reads_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("PVE_HOST", "pve-02.lab.example"),
        ("PVE_PORT", "8443"),
        ("PVE_TOKEN_ID", "ci"),
        ("PVE_TOKEN_SECRET", "5f0c"),
    ])
    .await;

    let cfg = ProxmoxConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(cfg.host, "pve-02.lab.example");
    assert_eq!(cfg.port, 8443);
    assert_eq!(cfg.user, "root@pam");
    assert_eq!(cfg.api_token(), Some(("ci", "5f0c")));
    assert!(!cfg.verify_ssl);
}

#[tokio::test]
async fn provision_config_reads_environment() {
    let _guard = EnvGuard::set_vars(&[
        ("VMFORGE_DEFAULT_NODE", "pve-03"),
        ("VMFORGE_VMID_MIN", "300"),
    ])
    .await;

    let cfg = ProvisionConfig::load_without_cli_args()
        .unwrap_or_else(|err| panic!("config should load: {err}"));

    assert_eq!(cfg.default_node, "pve-03");
    assert_eq!(cfg.vmid_range(), 300..=999);
    assert_eq!(cfg.default_storage, "local-lvm");
    assert!(cfg.enable_auto_start);
}
