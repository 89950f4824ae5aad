//! Translation of requests into hypervisor parameters.

use crate::config::ProvisionConfig;
use crate::control_plane::{CloneOptions, ConfigParams, Node};
use crate::request::{Bios, CloneRequest, CreateRequest};

/// Parameters for creating `request` with the configured fallbacks.
pub(crate) fn create_params(request: &CreateRequest, config: &ProvisionConfig) -> ConfigParams {
    let storage = request
        .storage
        .as_deref()
        .unwrap_or(&config.default_storage);
    let bridge = request
        .network_bridge
        .as_deref()
        .unwrap_or(&config.default_bridge);

    let mut params = ConfigParams::new()
        .with("name", &request.name)
        .with("cores", request.cores)
        .with("sockets", request.sockets)
        .with("cpu", &request.cpu_type)
        .with("memory", request.memory)
        .with("net0", format!("{},bridge={bridge}", request.network_model))
        .with("ostype", request.os_type.hypervisor_code())
        .with("bios", request.bios.as_str())
        .with("machine", request.machine.as_str());

    if request.bios == Bios::Ovmf {
        params.set(
            "efidisk0",
            format!("{storage}:1,efitype=4m,pre-enrolled-keys=1"),
        );
    }
    params.set("scsi0", format!("{storage}:{}", request.disk_size));
    params.set("scsihw", "virtio-scsi-pci");
    if request.enable_guest_agent {
        params.set("agent", 1);
    }
    if let Some(iso) = &request.iso {
        params.set("ide2", format!("{iso},media=cdrom"));
    }
    if let Some(virtio_iso) = &request.virtio_iso {
        params.set("ide0", format!("{virtio_iso},media=cdrom"));
    }
    if request.iso.is_some() {
        params.set("boot", "order=ide2;scsi0");
    }
    if let Some(description) = &request.description {
        params.set("description", description);
    }
    if !request.tags.is_empty() {
        params.set("tags", request.tags.join(";"));
    }
    params
}

/// Clone submission options; `target` is set only when the clone lands on a
/// node other than the template's.
pub(crate) fn clone_options(
    request: &CloneRequest,
    config: &ProvisionConfig,
    template_node: &Node,
    target_node: &Node,
) -> CloneOptions {
    CloneOptions {
        name: request.name.clone(),
        full: request.full_clone,
        storage: Some(
            request
                .storage
                .clone()
                .unwrap_or_else(|| config.default_storage.clone()),
        ),
        target: (target_node != template_node).then(|| target_node.clone()),
        description: request.description.clone(),
    }
}

/// Post-clone overrides, empty when the request carries none.
pub(crate) fn customization_params(request: &CloneRequest) -> ConfigParams {
    let mut params = ConfigParams::new();
    if let Some(cores) = request.cores {
        params.set("cores", cores);
    }
    if let Some(memory) = request.memory {
        params.set("memory", memory);
    }
    if !request.tags.is_empty() {
        params.set("tags", request.tags.join(";"));
    }
    params
}
