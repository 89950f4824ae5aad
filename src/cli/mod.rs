//! Command-line interface definitions for the `vmforge` binary.
//!
//! The clap structures live here so both the binary and the build script can
//! use them; the build script renders the manual page from them.

use camino::Utf8PathBuf;
use clap::{Args, Parser};

/// Top-level CLI for the `vmforge` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vmforge",
    about = "Provision and validate Proxmox VE virtual machines",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a VM from a JSON create request.
    #[command(name = "create", about = "Create a VM from a JSON create request")]
    Create(RequestFile),
    /// Clone a template from a JSON clone request.
    #[command(name = "clone", about = "Clone a template from a JSON clone request")]
    Clone(RequestFile),
    /// Run a JSON array of tagged requests one after another.
    #[command(name = "batch", about = "Run a JSON array of create and clone requests")]
    Batch(RequestFile),
    /// Check that a VM is running and reachable.
    #[command(name = "validate", about = "Check that a VM is running and reachable")]
    Validate(ValidateCommand),
    /// List templates, optionally on one node.
    #[command(name = "templates", about = "List VM templates")]
    Templates(TemplatesCommand),
    /// Show one template's configuration.
    #[command(name = "template", about = "Show the configuration of one template")]
    Template(VmidArg),
    /// Show a VM's configuration and power state.
    #[command(name = "info", about = "Show a VM's configuration and power state")]
    Info(VmidArg),
    /// Show a VM's runtime figures.
    #[command(name = "status", about = "Show a VM's runtime status")]
    Status(VmidArg),
    /// Check that the Proxmox API answers.
    #[command(name = "cluster", about = "Check that the Proxmox API answers and count its nodes")]
    Cluster,
    /// Check a request without contacting the hypervisor.
    #[command(
        name = "check",
        about = "Check a request for obvious mistakes without contacting the hypervisor"
    )]
    Check(CheckCommand),
}

/// Request input shared by the provisioning subcommands.
#[derive(Debug, Args)]
pub(crate) struct RequestFile {
    /// Path of the JSON request document.
    #[arg(long, short = 'f', value_name = "PATH")]
    pub(crate) file: Utf8PathBuf,
    /// User recorded in audit entries.
    #[arg(long, env = "VMFORGE_ACTOR", default_value = "vmforge")]
    pub(crate) actor: String,
}

/// Arguments for `vmforge validate`.
#[derive(Debug, Args)]
pub(crate) struct ValidateCommand {
    /// Identifier of the VM to validate.
    pub(crate) vmid: u32,
    /// Guest operating system; `windows` probes RDP, anything else SSH.
    #[arg(long, default_value = "linux")]
    pub(crate) os: String,
    /// Overall deadline in seconds. Defaults to the configured timeout.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) timeout: Option<u64>,
    /// Only check that the VM exists and is running.
    #[arg(long)]
    pub(crate) quick: bool,
    /// User recorded in audit entries.
    #[arg(long, env = "VMFORGE_ACTOR", default_value = "vmforge")]
    pub(crate) actor: String,
}

/// Arguments for `vmforge check`.
#[derive(Debug, Args)]
pub(crate) struct CheckCommand {
    /// Path of the JSON request document.
    #[arg(long, short = 'f', value_name = "PATH")]
    pub(crate) file: Utf8PathBuf,
    /// Treat the document as a clone request instead of a create request.
    #[arg(long)]
    pub(crate) clone: bool,
}

/// Arguments for `vmforge templates`.
#[derive(Debug, Args)]
pub(crate) struct TemplatesCommand {
    /// Only list templates on this node.
    #[arg(long)]
    pub(crate) node: Option<String>,
}

/// A single VM identifier.
#[derive(Debug, Args)]
pub(crate) struct VmidArg {
    /// Identifier of the VM or template.
    pub(crate) vmid: u32,
}
