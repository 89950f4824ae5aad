//! Endpoint mapping for [`ProxmoxClient`].

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::control_plane::{
    CloneOptions, ConfigParams, ControlPlane, ControlPlaneError, ControlPlaneFuture,
    GuestInterface, Node, NodeSummary, TaskHandle, TaskStatus, Upid, VersionInfo, VmConfig,
    VmStatus, VmSummary, flag_is_set,
};

use super::ProxmoxClient;

/// Listing entry as returned by `/cluster/resources` and `/nodes/{node}/qemu`.
#[derive(Debug, Deserialize)]
pub(super) struct RawVm {
    vmid: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    node: Option<Node>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    template: Value,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, alias = "maxcpu")]
    cpus: Option<u32>,
    #[serde(default)]
    maxmem: Option<u64>,
    #[serde(default)]
    maxdisk: Option<u64>,
}

impl RawVm {
    /// Converts the entry, filling in `node` when the listing was per node.
    /// Containers and entries without a node are dropped.
    pub(super) fn into_summary(self, listed_on: Option<&Node>) -> Option<VmSummary> {
        if self.kind.as_deref().is_some_and(|kind| kind != "qemu") {
            return None;
        }
        let node = self.node.or_else(|| listed_on.cloned())?;
        Some(VmSummary {
            vmid: self.vmid,
            name: self.name,
            node,
            status: self.status,
            template: flag_is_set(&self.template),
            cpus: self.cpus,
            maxmem: self.maxmem,
            maxdisk: self.maxdisk,
        })
    }
}

/// `nextid` arrives as a string on most versions and as a number on some.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum LooseId {
    Number(u32),
    Text(String),
}

impl LooseId {
    pub(super) fn into_id(self) -> Result<u32, ControlPlaneError> {
        match self {
            Self::Number(id) => Ok(id),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|err| ControlPlaneError::Decode(format!("next id {text:?}: {err}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentInterfaces {
    #[serde(default)]
    result: Vec<GuestInterface>,
}

impl ProxmoxClient {
    async fn submit(
        &self,
        node: &Node,
        segments: &[&str],
        params: &ConfigParams,
    ) -> Result<TaskHandle, ControlPlaneError> {
        let upid: Upid = self
            .call(Method::POST, segments, &[], Some(params))
            .await?;
        debug!(node = %node, %upid, "task submitted");
        Ok(TaskHandle::new(node.clone(), upid))
    }
}

impl ControlPlane for ProxmoxClient {
    fn version(&self) -> ControlPlaneFuture<'_, VersionInfo> {
        Box::pin(async move { self.get(&["version"]).await })
    }

    fn list_nodes(&self) -> ControlPlaneFuture<'_, Vec<NodeSummary>> {
        Box::pin(async move { self.get(&["nodes"]).await })
    }

    fn list_vms<'a>(&'a self, node: Option<&'a Node>) -> ControlPlaneFuture<'a, Vec<VmSummary>> {
        Box::pin(async move {
            let raw: Vec<RawVm> = match node {
                Some(name) => self.get(&["nodes", name.as_str(), "qemu"]).await?,
                None => {
                    self.call(
                        Method::GET,
                        &["cluster", "resources"],
                        &[("type", "vm")],
                        None,
                    )
                    .await?
                }
            };
            Ok(raw
                .into_iter()
                .filter_map(|vm| vm.into_summary(node))
                .collect())
        })
    }

    fn find_node(&self, vmid: u32) -> ControlPlaneFuture<'_, Option<Node>> {
        Box::pin(async move {
            match self.list_vms(None).await {
                Ok(vms) => Ok(vms
                    .into_iter()
                    .find(|vm| vm.vmid == vmid)
                    .map(|vm| vm.node)),
                Err(err) => {
                    warn!(vmid, error = %err, "cluster scan failed; treating VM as absent");
                    Ok(None)
                }
            }
        })
    }

    fn next_free_id(&self) -> ControlPlaneFuture<'_, u32> {
        Box::pin(async move {
            let id: LooseId = self.get(&["cluster", "nextid"]).await?;
            id.into_id()
        })
    }

    fn vm_config<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmConfig> {
        Box::pin(async move {
            let id = vmid.to_string();
            self.get(&["nodes", node.as_str(), "qemu", &id, "config"])
                .await
        })
    }

    fn vm_status<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmStatus> {
        Box::pin(async move {
            let id = vmid.to_string();
            self.get(&["nodes", node.as_str(), "qemu", &id, "status", "current"])
                .await
        })
    }

    fn clone_vm<'a>(
        &'a self,
        node: &'a Node,
        source: u32,
        new_id: u32,
        options: &'a CloneOptions,
    ) -> ControlPlaneFuture<'a, TaskHandle> {
        Box::pin(async move {
            let id = source.to_string();
            self.submit(
                node,
                &["nodes", node.as_str(), "qemu", &id, "clone"],
                &options.to_params(new_id),
            )
            .await
        })
    }

    fn create_vm<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, TaskHandle> {
        Box::pin(async move {
            let mut form = ConfigParams::new().with("vmid", vmid);
            form.extend(params.clone());
            self.submit(node, &["nodes", node.as_str(), "qemu"], &form)
                .await
        })
    }

    fn start_vm<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, TaskHandle> {
        Box::pin(async move {
            let id = vmid.to_string();
            self.submit(
                node,
                &["nodes", node.as_str(), "qemu", &id, "status", "start"],
                &ConfigParams::new(),
            )
            .await
        })
    }

    fn update_config<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let id = vmid.to_string();
            let _: Value = self
                .call(
                    Method::PUT,
                    &["nodes", node.as_str(), "qemu", &id, "config"],
                    &[],
                    Some(params),
                )
                .await?;
            Ok(())
        })
    }

    fn task_status<'a>(&'a self, handle: &'a TaskHandle) -> ControlPlaneFuture<'a, TaskStatus> {
        Box::pin(async move {
            self.get(&[
                "nodes",
                handle.node.as_str(),
                "tasks",
                handle.upid.as_str(),
                "status",
            ])
            .await
        })
    }

    fn guest_interfaces<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
    ) -> ControlPlaneFuture<'a, Option<Vec<GuestInterface>>> {
        Box::pin(async move {
            let id = vmid.to_string();
            let answer: Result<AgentInterfaces, _> = self
                .get(&[
                    "nodes",
                    node.as_str(),
                    "qemu",
                    &id,
                    "agent",
                    "network-get-interfaces",
                ])
                .await;
            match answer {
                Ok(interfaces) => Ok(Some(interfaces.result)),
                Err(err) => {
                    debug!(vmid, error = %err, "guest agent unavailable");
                    Ok(None)
                }
            }
        })
    }
}
