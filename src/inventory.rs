//! Read-only views of the cluster: templates, VM details, runtime status and
//! control-plane reachability.

use serde::Serialize;
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::control_plane::{ControlPlane, ControlPlaneError, Node, VmConfig, VmSummary};
use crate::provision::ProvisionError;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;
const DISK_PREFIXES: [&str; 4] = ["scsi", "virtio", "sata", "ide"];

/// A template as shown to operators.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TemplateInfo {
    /// Template identifier.
    pub vmid: u32,
    /// Template name, `template-{vmid}` when unset.
    pub name: String,
    /// Node holding the template.
    pub node: String,
    /// Power state reported for the template.
    pub status: String,
    /// Always `true`; kept so listings are self-describing.
    pub template: bool,
    /// Virtual CPU count.
    pub cores: Option<u32>,
    /// Memory in MB.
    pub memory: Option<u64>,
    /// Boot disk size in bytes, when it can be expressed exactly.
    pub disk_size: Option<u64>,
    /// Boot disk size as displayed (`32.00 GB` in listings, the raw
    /// `size=` value in details).
    pub disk_size_gb: Option<String>,
    /// Free-form description from the template configuration.
    pub description: Option<String>,
}

/// Configuration summary of one VM.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VmInfo {
    /// VM identifier.
    pub vmid: u32,
    /// VM name, `vm-{vmid}` when unset.
    pub name: String,
    /// Hosting node.
    pub node: String,
    /// Power state.
    pub status: String,
    /// Configured cores.
    pub cores: Option<u32>,
    /// Configured memory in MB.
    pub memory: Option<u64>,
    /// Uptime in seconds.
    pub uptime: Option<u64>,
}

/// Runtime figures of one VM.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VmRuntimeStatus {
    /// VM identifier.
    pub vmid: u32,
    /// Hosting node.
    pub node: String,
    /// Power state.
    pub status: String,
    /// Uptime in seconds.
    pub uptime: Option<u64>,
    /// CPU load as reported by the hypervisor.
    pub cpu: Option<Number>,
    /// Memory in use, in bytes.
    pub memory: Option<u64>,
    /// Memory ceiling, in bytes.
    pub maxmem: Option<u64>,
}

/// Whether the control plane answers, and what it reports about itself.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ClusterStatus {
    /// `true` when both the version and node queries succeeded.
    pub connected: bool,
    /// Host the client talks to.
    pub host: String,
    /// Product version, when connected.
    pub version: Option<String>,
    /// Number of cluster nodes, when connected.
    pub nodes_count: Option<usize>,
    /// Human readable summary.
    pub message: String,
}

/// Read-only queries against a [`ControlPlane`].
pub struct Inventory<C> {
    control_plane: C,
}

impl<C: ControlPlane> Inventory<C> {
    /// Wraps a control-plane client.
    #[must_use]
    pub const fn new(control_plane: C) -> Self {
        Self { control_plane }
    }

    /// Lists templates, optionally restricted to one node.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Connection`] when the listing fails.
    pub async fn list_templates(
        &self,
        node: Option<&Node>,
    ) -> Result<Vec<TemplateInfo>, ProvisionError> {
        let vms = self.control_plane.list_vms(node).await.map_err(|err| {
            ProvisionError::Connection(format!("failed to list templates: {err}"))
        })?;
        let templates: Vec<TemplateInfo> = vms
            .into_iter()
            .filter(|vm| vm.template)
            .map(template_from_summary)
            .collect();
        debug!(count = templates.len(), "templates listed");
        Ok(templates)
    }

    /// Describes one template from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::TemplateNotFound`] when no VM has the
    /// identifier, [`ProvisionError::NotATemplate`] when the VM is a regular
    /// guest, and [`ProvisionError::Connection`] for other failures.
    pub async fn template_details(&self, vmid: u32) -> Result<TemplateInfo, ProvisionError> {
        let missing = || ProvisionError::TemplateNotFound { vmid };
        let node = self.locate(vmid).await?.ok_or_else(missing)?;
        let status = self
            .control_plane
            .vm_status(&node, vmid)
            .await
            .map_err(|err| lookup_error(err, missing))?;
        let config = self
            .control_plane
            .vm_config(&node, vmid)
            .await
            .map_err(|err| lookup_error(err, missing))?;
        if !config.is_template() {
            return Err(ProvisionError::NotATemplate { vmid });
        }

        let disk = boot_disk_size(&config);
        Ok(TemplateInfo {
            vmid,
            name: config
                .name()
                .map_or_else(|| format!("template-{vmid}"), str::to_owned),
            node: node.to_string(),
            status: status.status,
            template: true,
            cores: config_cores(&config),
            memory: config_number(&config, "memory"),
            disk_size: disk.as_deref().and_then(parse_size),
            disk_size_gb: disk,
            description: config_text(&config, "description"),
        })
    }

    /// Summarises a VM's configuration and power state.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::VmNotFound`] when no VM has the identifier
    /// and [`ProvisionError::Connection`] for other failures.
    pub async fn vm_info(&self, vmid: u32) -> Result<VmInfo, ProvisionError> {
        let missing = || ProvisionError::VmNotFound { vmid };
        let node = self.locate(vmid).await?.ok_or_else(missing)?;
        let status = self
            .control_plane
            .vm_status(&node, vmid)
            .await
            .map_err(|err| lookup_error(err, missing))?;
        let config = self
            .control_plane
            .vm_config(&node, vmid)
            .await
            .map_err(|err| lookup_error(err, missing))?;
        Ok(VmInfo {
            vmid,
            name: config
                .name()
                .map_or_else(|| format!("vm-{vmid}"), str::to_owned),
            node: node.to_string(),
            status: status.status,
            cores: config_cores(&config),
            memory: config_number(&config, "memory"),
            uptime: status.uptime,
        })
    }

    /// Reports a VM's runtime figures.
    ///
    /// # Errors
    ///
    /// As for [`Inventory::vm_info`].
    pub async fn vm_status(&self, vmid: u32) -> Result<VmRuntimeStatus, ProvisionError> {
        let missing = || ProvisionError::VmNotFound { vmid };
        let node = self.locate(vmid).await?.ok_or_else(missing)?;
        let status = self
            .control_plane
            .vm_status(&node, vmid)
            .await
            .map_err(|err| lookup_error(err, missing))?;
        Ok(VmRuntimeStatus {
            vmid,
            node: node.to_string(),
            status: status.status,
            uptime: status.uptime,
            cpu: status.cpu,
            memory: status.mem,
            maxmem: status.maxmem,
        })
    }

    /// Checks that the control plane answers version and node queries.
    /// Failures are reported in the result rather than as errors.
    pub async fn cluster_status(&self, host: &str) -> ClusterStatus {
        let queries = async {
            let version = self.control_plane.version().await?;
            let nodes = self.control_plane.list_nodes().await?;
            Ok::<_, ControlPlaneError>((version, nodes))
        };
        match queries.await {
            Ok((version, nodes)) => ClusterStatus {
                connected: true,
                host: host.to_owned(),
                version: Some(version.version),
                nodes_count: Some(nodes.len()),
                message: String::from("Connected to Proxmox successfully"),
            },
            Err(err) => {
                warn!(host, error = %err, "control plane status check failed");
                ClusterStatus {
                    connected: false,
                    host: host.to_owned(),
                    version: None,
                    nodes_count: None,
                    message: format!("Failed to connect to Proxmox: {err}"),
                }
            }
        }
    }

    async fn locate(&self, vmid: u32) -> Result<Option<Node>, ProvisionError> {
        self.control_plane
            .find_node(vmid)
            .await
            .map_err(|err| ProvisionError::Connection(err.to_string()))
    }
}

fn lookup_error(error: ControlPlaneError, missing: impl FnOnce() -> ProvisionError) -> ProvisionError {
    match error {
        ControlPlaneError::NotFound(_) => missing(),
        other => ProvisionError::Connection(other.to_string()),
    }
}

fn template_from_summary(vm: VmSummary) -> TemplateInfo {
    TemplateInfo {
        name: vm
            .name
            .unwrap_or_else(|| format!("template-{}", vm.vmid)),
        vmid: vm.vmid,
        node: vm.node.to_string(),
        status: if vm.status.is_empty() {
            String::from("unknown")
        } else {
            vm.status
        },
        template: true,
        cores: vm.cpus,
        memory: vm.maxmem.and_then(|bytes| bytes.checked_div(MIB)),
        disk_size: vm.maxdisk,
        disk_size_gb: vm.maxdisk.filter(|bytes| *bytes > 0).map(format_gib),
        description: None,
    }
}

/// Renders a byte count in GiB with two decimals, rounding half up.
fn format_gib(bytes: u64) -> String {
    let hundredths = bytes
        .saturating_mul(100)
        .saturating_add(GIB.checked_div(2).unwrap_or_default())
        .checked_div(GIB)
        .unwrap_or_default();
    let whole = hundredths.checked_div(100).unwrap_or_default();
    let fraction = hundredths.checked_rem(100).unwrap_or_default();
    format!("{whole}.{fraction:02} GB")
}

/// Returns the `size=` value of the first disk that is not a CD-ROM.
fn boot_disk_size(config: &VmConfig) -> Option<String> {
    config
        .iter()
        .filter(|(key, _)| {
            DISK_PREFIXES.iter().any(|prefix| {
                key.strip_prefix(prefix).is_some_and(|index| {
                    !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit())
                })
            })
        })
        .filter_map(|(_, value)| value.as_str())
        .filter(|spec| !spec.contains("media=cdrom"))
        .find_map(|spec| {
            spec.split(',')
                .find_map(|part| part.trim().strip_prefix("size="))
                .map(str::to_owned)
        })
}

/// Converts an integral Proxmox size (`32G`, `512M`) to bytes.
fn parse_size(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let (digits, multiplier) = match trimmed.chars().last()? {
        'K' => (trimmed.strip_suffix('K')?, 1024),
        'M' => (trimmed.strip_suffix('M')?, MIB),
        'G' => (trimmed.strip_suffix('G')?, GIB),
        'T' => (trimmed.strip_suffix('T')?, GIB.saturating_mul(1024)),
        _ => (trimmed, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

fn config_number(config: &VmConfig, key: &str) -> Option<u64> {
    match config.get(key)? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn config_cores(config: &VmConfig) -> Option<u32> {
    config_number(config, "cores")
        .or_else(|| config_number(config, "cpus"))
        .and_then(|cores| u32::try_from(cores).ok())
}

fn config_text(config: &VmConfig, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(|text| text.trim_end().to_owned())
        .filter(|text| !text.is_empty())
}
