//! Configuration loading via `ortho-config`.
//!
//! Two layered structs cover the two concerns: [`ProxmoxConfig`] for reaching
//! the hypervisor API and [`ProvisionConfig`] for orchestration defaults.
//! Values merge defaults, `vmforge.toml`, environment variables, and CLI
//! flags in that order of precedence.

use std::ffi::OsString;
use std::ops::RangeInclusive;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Connection settings for the Proxmox VE API.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PVE",
    discovery(
        app_name = "vmforge",
        env_var = "VMFORGE_CONFIG_PATH",
        config_file_name = "vmforge.toml",
        dotfile_name = ".vmforge.toml",
        project_file_name = "vmforge.toml"
    )
)]
pub struct ProxmoxConfig {
    /// Hostname or IP address of a cluster node.
    #[ortho_config(default = String::new())]
    pub host: String,
    /// API port. Defaults to `8006`.
    #[ortho_config(default = 8006)]
    pub port: u16,
    /// Realm-qualified user (for example `root@pam`).
    #[ortho_config(default = "root@pam".to_owned())]
    pub user: String,
    /// Password used for ticket authentication.
    pub password: Option<String>,
    /// API token identifier; when set together with the secret, token
    /// authentication replaces ticket login.
    pub token_id: Option<String>,
    /// API token secret.
    pub token_secret: Option<String>,
    /// Whether to verify the server certificate. Self-signed certificates are
    /// the norm on fresh clusters, so this defaults to `false`.
    #[ortho_config(default = false)]
    pub verify_ssl: bool,
}

/// Orchestration defaults and timings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VMFORGE",
    discovery(
        app_name = "vmforge",
        env_var = "VMFORGE_CONFIG_PATH",
        config_file_name = "vmforge.toml",
        dotfile_name = ".vmforge.toml",
        project_file_name = "vmforge.toml"
    )
)]
pub struct ProvisionConfig {
    /// Node used when a create request names none.
    #[ortho_config(default = String::new())]
    pub default_node: String,
    /// Storage pool for disks and full clones.
    #[ortho_config(default = "local-lvm".to_owned())]
    pub default_storage: String,
    /// Bridge attached to `net0` on created VMs.
    #[ortho_config(default = "vmbr0".to_owned())]
    pub default_bridge: String,
    /// Lowest identifier the tool may assign.
    #[ortho_config(default = 150)]
    pub vmid_min: u32,
    /// Highest identifier the tool may assign.
    #[ortho_config(default = 999)]
    pub vmid_max: u32,
    /// Global switch for starting VMs after create or clone.
    #[ortho_config(default = true)]
    pub enable_auto_start: bool,
    /// Deadline for clone tasks in seconds.
    #[ortho_config(default = 300)]
    pub clone_timeout_secs: u64,
    /// Deadline for create tasks in seconds.
    #[ortho_config(default = 120)]
    pub create_timeout_secs: u64,
    /// Interval between task status polls in seconds.
    #[ortho_config(default = 2)]
    pub task_poll_interval_secs: u64,
    /// Overall validation deadline in seconds.
    #[ortho_config(default = 300)]
    pub validation_timeout_secs: u64,
    /// Port probed on Linux guests.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Port probed on Windows guests.
    #[ortho_config(default = 3389)]
    pub rdp_port: u16,
    /// How long validation waits for the guest to report an address.
    #[ortho_config(default = 120)]
    pub address_wait_secs: u64,
    /// Interval between guest address queries.
    #[ortho_config(default = 10)]
    pub address_retry_secs: u64,
    /// Connect timeout for the port probe.
    #[ortho_config(default = 5)]
    pub port_connect_timeout_secs: u64,
    /// File receiving JSON Lines audit records.
    #[ortho_config(default = "logs/audit.log".to_owned())]
    pub audit_log_path: String,
    /// Host receiving cloud-init snippets over SSH. Native cloud-init
    /// parameters are used when unset.
    pub snippet_host: Option<String>,
    /// SSH user for snippet uploads.
    #[ortho_config(default = "root".to_owned())]
    pub snippet_user: String,
    /// Snippet directory on the host.
    #[ortho_config(default = "/var/lib/vz/snippets".to_owned())]
    pub snippet_dir: String,
    /// Storage identifier that exposes the snippet directory.
    #[ortho_config(default = "local".to_owned())]
    pub snippet_storage: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in vmforge.toml",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "invalid {} ({reason}): check {} or {} in [{}] of vmforge.toml",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(metadata.invalid("must be greater than zero"));
    }
    Ok(())
}

impl ProxmoxConfig {
    /// Loads configuration using the `ortho-config` derive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("vmforge")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the API token pair when both halves are configured.
    #[must_use]
    pub fn api_token(&self) -> Option<(&str, &str)> {
        match (self.token_id.as_deref(), self.token_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.trim().is_empty() && !secret.trim().is_empty() => {
                Some((id, secret))
            }
            _ => None,
        }
    }

    /// Base URL of the JSON API.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host.trim(), self.port)
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the host, user or
    /// credentials are absent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.host,
            &FieldMetadata::new("Proxmox host", "PVE_HOST", "host", "proxmox"),
        )?;
        require_field(
            &self.user,
            &FieldMetadata::new("Proxmox user", "PVE_USER", "user", "proxmox"),
        )?;
        if self.api_token().is_some() {
            return Ok(());
        }
        require_field(
            self.password.as_deref().unwrap_or_default(),
            &FieldMetadata::new(
                "Proxmox password or API token",
                "PVE_PASSWORD",
                "password",
                "proxmox",
            ),
        )
    }
}

impl ProvisionConfig {
    /// Loads configuration using the `ortho-config` derive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("vmforge")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Inclusive range of identifiers the tool may assign.
    #[must_use]
    pub const fn vmid_range(&self) -> RangeInclusive<u32> {
        self.vmid_min..=self.vmid_max
    }

    /// Deadline for clone tasks.
    #[must_use]
    pub const fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    /// Deadline for create tasks.
    #[must_use]
    pub const fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.create_timeout_secs)
    }

    /// Interval between task status polls.
    #[must_use]
    pub const fn task_poll_interval(&self) -> Duration {
        Duration::from_secs(self.task_poll_interval_secs)
    }

    /// Overall validation deadline.
    #[must_use]
    pub const fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    /// Address wait budget.
    #[must_use]
    pub const fn address_wait(&self) -> Duration {
        Duration::from_secs(self.address_wait_secs)
    }

    /// Address retry interval.
    #[must_use]
    pub const fn address_retry(&self) -> Duration {
        Duration::from_secs(self.address_retry_secs)
    }

    /// Port probe connect timeout.
    #[must_use]
    pub const fn port_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.port_connect_timeout_secs)
    }

    /// Audit log location.
    #[must_use]
    pub fn audit_log_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.audit_log_path)
    }

    /// Performs semantic validation on required fields and ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is empty
    /// and [`ConfigError::Invalid`] when a range or duration is unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.default_node,
            &FieldMetadata::new(
                "default node",
                "VMFORGE_DEFAULT_NODE",
                "default_node",
                "provision",
            ),
        )?;
        require_field(
            &self.default_storage,
            &FieldMetadata::new(
                "default storage",
                "VMFORGE_DEFAULT_STORAGE",
                "default_storage",
                "provision",
            ),
        )?;
        require_field(
            &self.default_bridge,
            &FieldMetadata::new(
                "default network bridge",
                "VMFORGE_DEFAULT_BRIDGE",
                "default_bridge",
                "provision",
            ),
        )?;
        if self.vmid_min == 0 || self.vmid_min > self.vmid_max {
            return Err(FieldMetadata::new(
                "VM ID range",
                "VMFORGE_VMID_MIN",
                "vmid_min",
                "provision",
            )
            .invalid("vmid_min must be positive and not exceed vmid_max"));
        }
        let durations = [
            (
                self.clone_timeout_secs,
                FieldMetadata::new(
                    "clone timeout",
                    "VMFORGE_CLONE_TIMEOUT_SECS",
                    "clone_timeout_secs",
                    "provision",
                ),
            ),
            (
                self.create_timeout_secs,
                FieldMetadata::new(
                    "create timeout",
                    "VMFORGE_CREATE_TIMEOUT_SECS",
                    "create_timeout_secs",
                    "provision",
                ),
            ),
            (
                self.task_poll_interval_secs,
                FieldMetadata::new(
                    "task poll interval",
                    "VMFORGE_TASK_POLL_INTERVAL_SECS",
                    "task_poll_interval_secs",
                    "provision",
                ),
            ),
            (
                self.validation_timeout_secs,
                FieldMetadata::new(
                    "validation timeout",
                    "VMFORGE_VALIDATION_TIMEOUT_SECS",
                    "validation_timeout_secs",
                    "provision",
                ),
            ),
            (
                self.address_retry_secs,
                FieldMetadata::new(
                    "address retry interval",
                    "VMFORGE_ADDRESS_RETRY_SECS",
                    "address_retry_secs",
                    "provision",
                ),
            ),
        ];
        for (value, metadata) in &durations {
            require_positive(*value, metadata)?;
        }
        require_field(
            &self.audit_log_path,
            &FieldMetadata::new(
                "audit log path",
                "VMFORGE_AUDIT_LOG_PATH",
                "audit_log_path",
                "provision",
            ),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
