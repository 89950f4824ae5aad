//! Cloud-init payloads applied to freshly cloned VMs.
//!
//! Two delivery paths exist. With a [`SnippetStore`] the full user-data
//! document is rendered, uploaded to the host, and referenced through
//! `cicustom`. Without one, the hypervisor's native cloud-init parameters
//! carry the network settings and the first user.

mod snippet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::command::CommandError;
use crate::control_plane::ConfigParams;

pub use snippet::{SnippetStore, SshSnippetStore, snippet_file_name};

/// Package that is always installed so validation can reach the guest.
pub const SSH_PACKAGE: &str = "openssh-server";

/// User account created by cloud-init.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudInitUser {
    /// Login name.
    pub username: String,
    /// Plain password; also unlocks password login.
    #[serde(default)]
    pub password: Option<String>,
    /// Authorised SSH public keys.
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Grants passwordless sudo and membership of the `sudo` group.
    #[serde(default)]
    pub sudo: bool,
    /// Supplementary groups.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Cloud-init settings supplied with a clone request.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloudInitConfig {
    /// Interface configuration for `ipconfig0` (for example
    /// `ip=192.168.1.100/24,gw=192.168.1.1`).
    #[serde(default)]
    pub ipconfig: Option<String>,
    /// DNS server.
    #[serde(default)]
    pub nameserver: Option<String>,
    /// DNS search domain.
    #[serde(default)]
    pub searchdomain: Option<String>,
    /// Accounts to create.
    #[serde(default)]
    pub users: Vec<CloudInitUser>,
    /// Extra packages to install.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Commands run on first boot after SSH is enabled.
    #[serde(default)]
    pub runcmd: Vec<String>,
}

/// Errors raised while rendering or delivering a guest-init payload.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GuestInitError {
    /// YAML serialisation failed.
    #[error("failed to render cloud-init user-data: {0}")]
    Render(String),
    /// The upload command could not be launched.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The upload command ran but failed.
    #[error("snippet upload to {host} failed with status {status_text}: {stderr}")]
    Upload {
        /// Host receiving the snippet.
        host: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
}

#[derive(Serialize)]
struct UserDocument<'a> {
    hostname: &'a str,
    manage_etc_hosts: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    users: Vec<UserEntry<'a>>,
    packages: Vec<&'a str>,
    package_update: bool,
    package_upgrade: bool,
    runcmd: Vec<&'a str>,
}

#[derive(Serialize)]
struct UserEntry<'a> {
    name: &'a str,
    shell: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    passwd: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_passwd: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ssh_authorized_keys: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sudo: Option<&'static str>,
    groups: Vec<&'a str>,
}

impl<'a> From<&'a CloudInitUser> for UserEntry<'a> {
    fn from(user: &'a CloudInitUser) -> Self {
        let mut groups: Vec<&str> = user.groups.iter().map(String::as_str).collect();
        if user.sudo && !groups.contains(&"sudo") {
            groups.push("sudo");
        }
        let password = user.password.as_deref().filter(|value| !value.is_empty());
        Self {
            name: &user.username,
            shell: "/bin/bash",
            passwd: password,
            lock_passwd: password.map(|_| false),
            ssh_authorized_keys: user.ssh_keys.iter().map(String::as_str).collect(),
            sudo: user.sudo.then_some("ALL=(ALL) NOPASSWD:ALL"),
            groups,
        }
    }
}

/// Renders a `#cloud-config` user-data document for `hostname`.
///
/// `openssh-server` is always installed first and SSH is enabled before any
/// user supplied command runs.
///
/// # Errors
///
/// Returns [`GuestInitError::Render`] when YAML serialisation fails.
pub fn render_user_data(config: &CloudInitConfig, hostname: &str) -> Result<String, GuestInitError> {
    let mut packages = vec![SSH_PACKAGE];
    for package in &config.packages {
        if !packages.contains(&package.as_str()) {
            packages.push(package);
        }
    }
    let mut runcmd = vec!["systemctl enable ssh", "systemctl start ssh"];
    runcmd.extend(config.runcmd.iter().map(String::as_str));

    let document = UserDocument {
        hostname,
        manage_etc_hosts: true,
        users: config.users.iter().map(UserEntry::from).collect(),
        packages,
        package_update: true,
        package_upgrade: true,
        runcmd,
    };
    let yaml =
        serde_yaml_ng::to_string(&document).map_err(|err| GuestInitError::Render(err.to_string()))?;
    Ok(format!("#cloud-config\n{yaml}"))
}

/// Normalises an `ipconfig` value for `ipconfig0`.
///
/// Empty input selects DHCP, values already in `key=value` form pass through,
/// and a bare address is treated as `ip=<value>`.
#[must_use]
pub fn parse_ipconfig(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::from("ip=dhcp");
    }
    if trimmed.contains('=') {
        return trimmed.to_owned();
    }
    format!("ip={trimmed}")
}

/// Network parameters shared by both delivery paths.
#[must_use]
pub fn network_params(config: &CloudInitConfig) -> ConfigParams {
    let mut params = ConfigParams::new();
    if let Some(ipconfig) = &config.ipconfig {
        params.set("ipconfig0", parse_ipconfig(ipconfig));
    }
    if let Some(nameserver) = config.nameserver.as_deref().filter(|v| !v.trim().is_empty()) {
        params.set("nameserver", nameserver);
    }
    if let Some(domain) = config.searchdomain.as_deref().filter(|v| !v.trim().is_empty()) {
        params.set("searchdomain", domain);
    }
    params
}

/// Native cloud-init parameters for the first configured user.
///
/// SSH keys are newline-joined and percent-encoded with `%20` for spaces, the
/// form the hypervisor expects for `sshkeys`.
#[must_use]
pub fn native_user_params(config: &CloudInitConfig) -> ConfigParams {
    let mut params = ConfigParams::new();
    let Some(user) = config.users.first() else {
        return params;
    };
    params.set("ciuser", &user.username);
    if let Some(password) = user.password.as_deref().filter(|value| !value.is_empty()) {
        params.set("cipassword", password);
    }
    if !user.ssh_keys.is_empty() {
        params.set("sshkeys", encode_ssh_keys(&user.ssh_keys));
    }
    params
}

fn encode_ssh_keys(keys: &[String]) -> String {
    let joined = keys.join("\n");
    form_urlencoded::byte_serialize(joined.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Parameters pointing the VM at an uploaded user-data snippet.
#[must_use]
pub fn snippet_params(config: &CloudInitConfig, volume: &str) -> ConfigParams {
    let mut params = ConfigParams::new().with("cicustom", format!("user={volume}"));
    params.extend(network_params(config));
    params
}
