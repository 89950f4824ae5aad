//! Control-plane abstraction for talking to the hypervisor cluster.
//!
//! Provisioning and validation only ever see the [`ControlPlane`] trait; the
//! Proxmox client and the scripted test doubles both implement it.

mod error;
mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use error::ControlPlaneError;
pub use types::{
    CloneOptions, ConfigParams, GuestInterface, GuestIpAddress, Node, NodeSummary, TaskHandle,
    TaskStatus, Upid, VersionInfo, VmConfig, VmStatus, VmSummary,
};

pub(crate) use types::flag_is_set;

/// Future returned by control-plane operations.
pub type ControlPlaneFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ControlPlaneError>> + Send + 'a>>;

/// Operations the orchestration layer needs from the hypervisor.
pub trait ControlPlane: Send + Sync {
    /// Returns the hypervisor version.
    fn version(&self) -> ControlPlaneFuture<'_, VersionInfo>;

    /// Lists the cluster nodes.
    fn list_nodes(&self) -> ControlPlaneFuture<'_, Vec<NodeSummary>>;

    /// Lists VMs on `node`, or across every node when `node` is `None`.
    fn list_vms<'a>(&'a self, node: Option<&'a Node>) -> ControlPlaneFuture<'a, Vec<VmSummary>>;

    /// Locates the node hosting `vmid`.
    ///
    /// The default implementation scans [`ControlPlane::list_vms`] across the
    /// cluster.
    fn find_node(&self, vmid: u32) -> ControlPlaneFuture<'_, Option<Node>> {
        Box::pin(async move {
            let vms = self.list_vms(None).await?;
            Ok(vms
                .into_iter()
                .find(|vm| vm.vmid == vmid)
                .map(|vm| vm.node))
        })
    }

    /// Returns the next identifier the cluster considers free.
    fn next_free_id(&self) -> ControlPlaneFuture<'_, u32>;

    /// Fetches the configuration of `vmid` on `node`.
    fn vm_config<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmConfig>;

    /// Fetches the runtime status of `vmid` on `node`.
    fn vm_status<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmStatus>;

    /// Submits a clone of template `source` into `new_id`.
    fn clone_vm<'a>(
        &'a self,
        node: &'a Node,
        source: u32,
        new_id: u32,
        options: &'a CloneOptions,
    ) -> ControlPlaneFuture<'a, TaskHandle>;

    /// Submits creation of `vmid` with the given parameters.
    fn create_vm<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, TaskHandle>;

    /// Submits a start request for `vmid`.
    fn start_vm<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, TaskHandle>;

    /// Applies configuration changes to `vmid`.
    fn update_config<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, ()>;

    /// Reads the status of a previously submitted task.
    fn task_status<'a>(&'a self, handle: &'a TaskHandle) -> ControlPlaneFuture<'a, TaskStatus>;

    /// Queries the guest agent for network interfaces.
    ///
    /// Resolves to `None` when the agent is unavailable.
    fn guest_interfaces<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
    ) -> ControlPlaneFuture<'a, Option<Vec<GuestInterface>>>;
}

impl<T: ControlPlane + ?Sized> ControlPlane for Arc<T> {
    fn version(&self) -> ControlPlaneFuture<'_, VersionInfo> {
        (**self).version()
    }

    fn list_nodes(&self) -> ControlPlaneFuture<'_, Vec<NodeSummary>> {
        (**self).list_nodes()
    }

    fn list_vms<'a>(&'a self, node: Option<&'a Node>) -> ControlPlaneFuture<'a, Vec<VmSummary>> {
        (**self).list_vms(node)
    }

    fn find_node(&self, vmid: u32) -> ControlPlaneFuture<'_, Option<Node>> {
        (**self).find_node(vmid)
    }

    fn next_free_id(&self) -> ControlPlaneFuture<'_, u32> {
        (**self).next_free_id()
    }

    fn vm_config<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmConfig> {
        (**self).vm_config(node, vmid)
    }

    fn vm_status<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmStatus> {
        (**self).vm_status(node, vmid)
    }

    fn clone_vm<'a>(
        &'a self,
        node: &'a Node,
        source: u32,
        new_id: u32,
        options: &'a CloneOptions,
    ) -> ControlPlaneFuture<'a, TaskHandle> {
        (**self).clone_vm(node, source, new_id, options)
    }

    fn create_vm<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, TaskHandle> {
        (**self).create_vm(node, vmid, params)
    }

    fn start_vm<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, TaskHandle> {
        (**self).start_vm(node, vmid)
    }

    fn update_config<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, ()> {
        (**self).update_config(node, vmid, params)
    }

    fn task_status<'a>(&'a self, handle: &'a TaskHandle) -> ControlPlaneFuture<'a, TaskStatus> {
        (**self).task_status(handle)
    }

    fn guest_interfaces<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
    ) -> ControlPlaneFuture<'a, Option<Vec<GuestInterface>>> {
        (**self).guest_interfaces(node, vmid)
    }
}
