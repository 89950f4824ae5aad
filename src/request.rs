//! Provisioning requests and pre-flight checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::guest_init::CloudInitConfig;

/// Longest VM name accepted by the hypervisor.
pub const MAX_NAME_LEN: usize = 255;

/// Guest operating system family.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "String", into = "String")]
pub enum OsType {
    /// Linux guests (`l26`), validated over SSH.
    #[default]
    Linux,
    /// Windows guests (`win11`), validated over RDP.
    Windows,
    /// Anything else; rejected by pre-flight checks and probed like Linux.
    Other(String),
}

impl OsType {
    /// Hypervisor `ostype` value.
    #[must_use]
    pub fn hypervisor_code(&self) -> &str {
        match self {
            Self::Windows => "win11",
            Self::Linux | Self::Other(_) => "l26",
        }
    }
}

impl From<String> for OsType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for OsType {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<OsType> for String {
    fn from(value: OsType) -> Self {
        match value {
            OsType::Linux => Self::from("linux"),
            OsType::Windows => Self::from("windows"),
            OsType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => formatter.write_str("linux"),
            Self::Windows => formatter.write_str("windows"),
            Self::Other(raw) => formatter.write_str(raw),
        }
    }
}

/// Firmware type.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bios {
    /// Legacy BIOS.
    #[default]
    Seabios,
    /// UEFI firmware; requires an EFI disk.
    Ovmf,
}

impl Bios {
    /// Hypervisor value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seabios => "seabios",
            Self::Ovmf => "ovmf",
        }
    }
}

/// Emulated chipset.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Machine {
    /// Modern Q35 chipset.
    #[default]
    Q35,
    /// Legacy i440FX chipset.
    I440fx,
}

impl Machine {
    /// Hypervisor value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Q35 => "q35",
            Self::I440fx => "i440fx",
        }
    }
}

const fn default_cores() -> u32 {
    2
}

const fn default_sockets() -> u32 {
    1
}

fn default_cpu_type() -> String {
    String::from("host")
}

const fn default_memory() -> u32 {
    2048
}

const fn default_disk_size() -> u32 {
    20
}

fn default_network_model() -> String {
    String::from("virtio")
}

const fn default_true() -> bool {
    true
}

/// Request to create a VM from scratch.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateRequest {
    /// VM name.
    pub name: String,
    /// Explicit identifier; allocated from the cluster when absent.
    #[serde(default)]
    pub vmid: Option<u32>,
    /// Target node; the configured default node when absent.
    #[serde(default)]
    pub node: Option<String>,
    /// Cores per socket.
    #[serde(default = "default_cores")]
    pub cores: u32,
    /// CPU sockets.
    #[serde(default = "default_sockets")]
    pub sockets: u32,
    /// CPU model (`host`, `kvm64`, ...).
    #[serde(default = "default_cpu_type")]
    pub cpu_type: String,
    /// Memory in MiB.
    #[serde(default = "default_memory")]
    pub memory: u32,
    /// System disk size in GiB.
    #[serde(default = "default_disk_size")]
    pub disk_size: u32,
    /// Storage pool; the configured default when absent.
    #[serde(default)]
    pub storage: Option<String>,
    /// Network bridge; the configured default when absent.
    #[serde(default)]
    pub network_bridge: Option<String>,
    /// NIC model (`virtio`, `e1000`, ...).
    #[serde(default = "default_network_model")]
    pub network_model: String,
    /// Guest OS family.
    #[serde(default)]
    pub os_type: OsType,
    /// Firmware.
    #[serde(default)]
    pub bios: Bios,
    /// Chipset.
    #[serde(default)]
    pub machine: Machine,
    /// Installer ISO volume (for example `local:iso/ubuntu.iso`).
    #[serde(default)]
    pub iso: Option<String>,
    /// VirtIO driver ISO attached as a second CD drive.
    #[serde(default)]
    pub virtio_iso: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags applied to the VM.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Start the VM once created.
    #[serde(default)]
    pub start_on_creation: bool,
    /// Enable the QEMU guest agent.
    #[serde(default)]
    pub enable_guest_agent: bool,
}

impl CreateRequest {
    /// Creates a request for `name` with every other field at its default.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vmid: None,
            node: None,
            cores: default_cores(),
            sockets: default_sockets(),
            cpu_type: default_cpu_type(),
            memory: default_memory(),
            disk_size: default_disk_size(),
            storage: None,
            network_bridge: None,
            network_model: default_network_model(),
            os_type: OsType::Linux,
            bios: Bios::Seabios,
            machine: Machine::Q35,
            iso: None,
            virtio_iso: None,
            description: None,
            tags: Vec::new(),
            start_on_creation: false,
            enable_guest_agent: false,
        }
    }
}

/// Request to clone a template.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloneRequest {
    /// Identifier of the source template.
    pub source_vmid: u32,
    /// Explicit identifier for the clone.
    #[serde(default)]
    pub new_vmid: Option<u32>,
    /// Name of the clone.
    pub name: String,
    /// Node receiving the clone; the template's node when absent.
    #[serde(default)]
    pub node: Option<String>,
    /// Storage for full clones; the configured default when absent.
    #[serde(default)]
    pub storage: Option<String>,
    /// Full clone (`true`) or linked clone (`false`).
    #[serde(default = "default_true")]
    pub full_clone: bool,
    /// Core count override applied after cloning.
    #[serde(default)]
    pub cores: Option<u32>,
    /// Memory override in MiB applied after cloning.
    #[serde(default)]
    pub memory: Option<u32>,
    /// Start the clone once configured.
    #[serde(default)]
    pub start_after_clone: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags applied after cloning.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cloud-init payload applied after cloning.
    #[serde(default, alias = "cloudinit")]
    pub cloud_init: Option<CloudInitConfig>,
}

impl CloneRequest {
    /// Creates a full clone request of `source_vmid` named `name`.
    #[must_use]
    pub fn new(source_vmid: u32, name: impl Into<String>) -> Self {
        Self {
            source_vmid,
            new_vmid: None,
            name: name.into(),
            node: None,
            storage: None,
            full_clone: true,
            cores: None,
            memory: None,
            start_after_clone: false,
            description: None,
            tags: Vec::new(),
            cloud_init: None,
        }
    }
}

/// Either kind of provisioning request, tagged by `kind` in JSON.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProvisioningRequest {
    /// Create from scratch.
    Create(CreateRequest),
    /// Clone a template.
    Clone(CloneRequest),
}

impl ProvisioningRequest {
    /// Name of the VM the request produces.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create(request) => &request.name,
            Self::Clone(request) => &request.name,
        }
    }
}

/// Outcome of a pre-flight check.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PreflightReport {
    /// `true` when no issues were found.
    pub valid: bool,
    /// Human readable issues in check order.
    pub issues: Vec<String>,
}

impl PreflightReport {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

fn check_name(name: &str, issues: &mut Vec<String>) {
    let length = name.trim().chars().count();
    if length == 0 || name.chars().count() > MAX_NAME_LEN {
        issues.push(format!("name must be between 1 and {MAX_NAME_LEN} characters"));
    }
}

fn check_cores(cores: u32, issues: &mut Vec<String>) {
    if !(1..=256).contains(&cores) {
        issues.push(String::from("cores must be between 1 and 256"));
    }
}

fn check_memory(memory: u32, issues: &mut Vec<String>) {
    if memory < 512 {
        issues.push(String::from("memory must be at least 512 MB"));
    }
}

/// Checks a create request without contacting the hypervisor.
#[must_use]
pub fn validate_create_request(request: &CreateRequest) -> PreflightReport {
    let mut issues = Vec::new();
    check_name(&request.name, &mut issues);
    if request.vmid == Some(0) {
        issues.push(String::from("vmid must be positive"));
    }
    check_cores(request.cores, &mut issues);
    if !(1..=4).contains(&request.sockets) {
        issues.push(String::from("sockets must be between 1 and 4"));
    }
    check_memory(request.memory, &mut issues);
    if request.disk_size < 8 {
        issues.push(String::from("disk_size must be at least 8 GB"));
    }
    if matches!(request.os_type, OsType::Other(_)) {
        issues.push(String::from("os_type must be 'linux' or 'windows'"));
    }
    PreflightReport::from_issues(issues)
}

/// Checks a clone request without contacting the hypervisor.
#[must_use]
pub fn validate_clone_request(request: &CloneRequest) -> PreflightReport {
    let mut issues = Vec::new();
    if request.source_vmid == 0 {
        issues.push(String::from("source_vmid must be positive"));
    }
    if request.new_vmid == Some(0) {
        issues.push(String::from("new_vmid must be positive"));
    }
    check_name(&request.name, &mut issues);
    if let Some(cores) = request.cores {
        check_cores(cores, &mut issues);
    }
    if let Some(memory) = request.memory {
        check_memory(memory, &mut issues);
    }
    if let Some(cloud_init) = &request.cloud_init
        && cloud_init
            .users
            .iter()
            .any(|user| user.username.trim().is_empty())
    {
        issues.push(String::from("cloud-init usernames must not be empty"));
    }
    PreflightReport::from_issues(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_pass_preflight() {
        let report = validate_create_request(&CreateRequest::named("web-01"));
        assert!(report.valid, "unexpected issues: {:?}", report.issues);
    }

    #[rstest]
    #[case::no_cores(|r: &mut CreateRequest| r.cores = 0, "cores must be between 1 and 256")]
    #[case::too_many_cores(|r: &mut CreateRequest| r.cores = 257, "cores must be between 1 and 256")]
    #[case::small_memory(|r: &mut CreateRequest| r.memory = 511, "memory must be at least 512 MB")]
    #[case::small_disk(|r: &mut CreateRequest| r.disk_size = 7, "disk_size must be at least 8 GB")]
    #[case::sockets(|r: &mut CreateRequest| r.sockets = 5, "sockets must be between 1 and 4")]
    #[case::os(|r: &mut CreateRequest| r.os_type = OsType::from("bsd"), "os_type must be 'linux' or 'windows'")]
    #[case::name(|r: &mut CreateRequest| r.name = String::new(), "name must be between 1 and 255 characters")]
    fn each_violation_is_listed(
        #[case] mutate: fn(&mut CreateRequest),
        #[case] expected: &str,
    ) {
        let mut request = CreateRequest::named("web-01");
        mutate(&mut request);
        let report = validate_create_request(&request);
        assert!(!report.valid);
        assert_eq!(report.issues, vec![expected.to_owned()]);
    }

    #[test]
    fn boundary_values_pass() {
        let request = CreateRequest {
            cores: 256,
            memory: 512,
            disk_size: 8,
            sockets: 4,
            ..CreateRequest::named("edge")
        };
        assert!(validate_create_request(&request).valid);
    }

    #[test]
    fn multiple_violations_are_reported_together() {
        let request = CreateRequest {
            cores: 0,
            memory: 128,
            ..CreateRequest::named("bad")
        };
        assert_eq!(validate_create_request(&request).issues.len(), 2);
    }

    #[test]
    fn os_type_parses_case_insensitively() {
        assert_eq!(OsType::from("Windows"), OsType::Windows);
        assert_eq!(OsType::from("LINUX"), OsType::Linux);
        assert_eq!(String::from(OsType::from("plan9")), "plan9");
    }

    #[test]
    fn provisioning_request_is_tagged_by_kind() {
        let request: ProvisioningRequest = serde_json::from_str(
            r#"{"kind": "clone", "source_vmid": 9000, "name": "srv-01"}"#,
        )
        .unwrap_or_else(|err| panic!("request should decode: {err}"));
        let ProvisioningRequest::Clone(clone) = request else {
            panic!("expected clone request");
        };
        assert!(clone.full_clone);
        assert_eq!(clone.source_vmid, 9000);
    }

    #[test]
    fn clone_overrides_are_checked() {
        let request = CloneRequest {
            cores: Some(300),
            ..CloneRequest::new(9000, "srv-01")
        };
        let report = validate_clone_request(&request);
        assert_eq!(report.issues, vec![String::from("cores must be between 1 and 256")]);
    }
}
