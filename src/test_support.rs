//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here are deterministic and in-memory: a scripted
//! [`ControlPlane`], an audit sink that keeps records, a port prober with
//! canned reports, and a command runner that replays queued outputs.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value, json};

use crate::audit::{AuditError, AuditRecord, AuditSink};
use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::config::ProvisionConfig;
use crate::control_plane::{
    CloneOptions, ConfigParams, ControlPlane, ControlPlaneError, ControlPlaneFuture,
    GuestInterface, GuestIpAddress, Node, NodeSummary, TaskHandle, TaskStatus, Upid, VersionInfo,
    VmConfig, VmStatus, VmSummary,
};
use crate::validation::{PortProber, ProbeFuture, ProbeReport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestration settings used throughout the tests: node `pve`, identifier
/// range 150..=999, and no snippet host.
#[must_use]
pub fn provision_config() -> ProvisionConfig {
    ProvisionConfig {
        default_node: String::from("pve"),
        default_storage: String::from("local-lvm"),
        default_bridge: String::from("vmbr0"),
        vmid_min: 150,
        vmid_max: 999,
        enable_auto_start: true,
        clone_timeout_secs: 300,
        create_timeout_secs: 120,
        task_poll_interval_secs: 2,
        validation_timeout_secs: 300,
        ssh_port: 22,
        rdp_port: 3389,
        address_wait_secs: 120,
        address_retry_secs: 10,
        port_connect_timeout_secs: 5,
        audit_log_path: String::from("logs/audit.log"),
        snippet_host: None,
        snippet_user: String::from("root"),
        snippet_dir: String::from("/var/lib/vz/snippets"),
        snippet_storage: String::from("local"),
        ssh_bin: String::from("ssh"),
    }
}

/// A VM known to [`ScriptedControlPlane`].
#[derive(Clone, Debug)]
struct ScriptedVm {
    node: Node,
    name: String,
    template: bool,
    status: String,
    uptime: Option<u64>,
    config: Map<String, Value>,
    cpus: Option<u32>,
    maxmem: Option<u64>,
    maxdisk: Option<u64>,
}

impl ScriptedVm {
    fn new(node: Node, name: String, template: bool, status: &str) -> Self {
        Self {
            node,
            name,
            template,
            status: status.to_owned(),
            uptime: (status == "running").then_some(60),
            config: Map::new(),
            cpus: None,
            maxmem: None,
            maxdisk: None,
        }
    }
}

/// A clone submission captured by [`ScriptedControlPlane`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedClone {
    /// Node the clone was submitted on.
    pub node: Node,
    /// Source template.
    pub source: u32,
    /// New identifier.
    pub new_id: u32,
    /// Submitted options.
    pub options: CloneOptions,
}

/// A create submission captured by [`ScriptedControlPlane`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordedCreate {
    /// Node the create was submitted on.
    pub node: Node,
    /// New identifier.
    pub vmid: u32,
    /// Submitted parameters.
    pub params: ConfigParams,
}

#[derive(Debug)]
struct PlaneState {
    vms: BTreeMap<u32, ScriptedVm>,
    next_id: u32,
    task_scripts: HashMap<Upid, VecDeque<Result<TaskStatus, ControlPlaneError>>>,
    default_task: TaskStatus,
    guest_interfaces: HashMap<u32, Option<Vec<GuestInterface>>>,
    failures: HashMap<&'static str, ControlPlaneError>,
    calls: Vec<&'static str>,
    clones: Vec<RecordedClone>,
    creates: Vec<RecordedCreate>,
    updates: Vec<(u32, ConfigParams)>,
    started: Vec<u32>,
    task_counter: u32,
}

impl Default for PlaneState {
    fn default() -> Self {
        Self {
            vms: BTreeMap::new(),
            next_id: 200,
            task_scripts: HashMap::new(),
            default_task: stopped("OK"),
            guest_interfaces: HashMap::new(),
            failures: HashMap::new(),
            calls: Vec::new(),
            clones: Vec::new(),
            creates: Vec::new(),
            updates: Vec::new(),
            started: Vec::new(),
            task_counter: 0,
        }
    }
}

impl PlaneState {
    fn enter(&mut self, operation: &'static str) -> Result<(), ControlPlaneError> {
        self.calls.push(operation);
        self.failures.get(operation).cloned().map_or(Ok(()), Err)
    }

    fn submit(&mut self, node: &Node, kind: &str, vmid: u32) -> TaskHandle {
        self.task_counter = self.task_counter.saturating_add(1);
        TaskHandle::new(
            node.clone(),
            format!("UPID:{node}:{:08X}:{kind}:{vmid}:root@pam:", self.task_counter),
        )
    }
}

fn stopped(exit: &str) -> TaskStatus {
    TaskStatus {
        status: String::from("stopped"),
        exitstatus: Some(exit.to_owned()),
    }
}

fn running() -> TaskStatus {
    TaskStatus {
        status: String::from("running"),
        exitstatus: None,
    }
}

/// In-memory [`ControlPlane`] whose answers are scripted by the test.
///
/// Submitted tasks finish with exit status `OK` on their first poll unless
/// scripted otherwise. Clones and creates register the new VM as stopped so
/// later lookups see it.
#[derive(Clone, Debug, Default)]
pub struct ScriptedControlPlane {
    state: Arc<Mutex<PlaneState>>,
}

impl ScriptedControlPlane {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template VM.
    pub fn add_template(&self, node: &str, vmid: u32, name: &str) {
        self.insert_vm(node, vmid, name, true, "stopped");
    }

    /// Registers a regular VM with the given power state.
    pub fn add_vm(&self, node: &str, vmid: u32, name: &str, status: &str) {
        self.insert_vm(node, vmid, name, false, status);
    }

    fn insert_vm(&self, node: &str, vmid: u32, name: &str, template: bool, status: &str) {
        lock(&self.state).vms.insert(
            vmid,
            ScriptedVm::new(Node::from(node), name.to_owned(), template, status),
        );
    }

    /// Changes the power state and uptime of a registered VM.
    pub fn set_vm_status(&self, vmid: u32, status: &str, uptime: Option<u64>) {
        if let Some(vm) = lock(&self.state).vms.get_mut(&vmid) {
            status.clone_into(&mut vm.status);
            vm.uptime = uptime;
        }
    }

    /// Adds `key` to the configuration document reported for `vmid`.
    pub fn set_vm_config_value(&self, vmid: u32, key: &str, value: Value) {
        if let Some(vm) = lock(&self.state).vms.get_mut(&vmid) {
            vm.config.insert(key.to_owned(), value);
        }
    }

    /// Sets the sizing reported by VM listings for `vmid`.
    pub fn set_vm_resources(&self, vmid: u32, cpus: u32, maxmem: u64, maxdisk: u64) {
        if let Some(vm) = lock(&self.state).vms.get_mut(&vmid) {
            vm.cpus = Some(cpus);
            vm.maxmem = Some(maxmem);
            vm.maxdisk = Some(maxdisk);
        }
    }

    /// Sets the lowest identifier `next_free_id` hands out; registered
    /// identifiers are skipped.
    pub fn set_next_id(&self, vmid: u32) {
        lock(&self.state).next_id = vmid;
    }

    /// Queues a `running` poll result for `upid`.
    pub fn push_task_running(&self, upid: &Upid) {
        self.push_task(upid, Ok(running()));
    }

    /// Queues a `stopped` poll result with `exit` for `upid`.
    pub fn push_task_stopped(&self, upid: &Upid, exit: &str) {
        self.push_task(upid, Ok(stopped(exit)));
    }

    /// Queues a failed poll for `upid`.
    pub fn push_task_error(&self, upid: &Upid, error: ControlPlaneError) {
        self.push_task(upid, Err(error));
    }

    fn push_task(&self, upid: &Upid, result: Result<TaskStatus, ControlPlaneError>) {
        lock(&self.state)
            .task_scripts
            .entry(upid.clone())
            .or_default()
            .push_back(result);
    }

    /// Makes tasks without a script report `running` forever.
    pub fn set_default_task_running(&self) {
        lock(&self.state).default_task = running();
    }

    /// Makes tasks without a script stop with `exit`.
    pub fn set_default_task_failed(&self, exit: &str) {
        lock(&self.state).default_task = stopped(exit);
    }

    /// Sets what the guest agent reports for `vmid`; `None` means the agent
    /// does not answer.
    pub fn set_guest_interfaces(&self, vmid: u32, interfaces: Option<Vec<GuestInterface>>) {
        lock(&self.state).guest_interfaces.insert(vmid, interfaces);
    }

    /// Shorthand for an agent reporting loopback plus `ip` on `eth0`.
    pub fn set_guest_ipv4(&self, vmid: u32, ip: &str) {
        self.set_guest_interfaces(
            vmid,
            Some(vec![
                guest_interface("lo", &["127.0.0.1"]),
                guest_interface("eth0", &[ip]),
            ]),
        );
    }

    /// Makes every call of `operation` fail with `error`.
    ///
    /// Operation names match the trait methods (`clone_vm`, `start_vm`, ...).
    pub fn fail(&self, operation: &'static str, error: ControlPlaneError) {
        lock(&self.state).failures.insert(operation, error);
    }

    /// Fails clone submissions.
    pub fn fail_clone(&self, error: ControlPlaneError) {
        self.fail("clone_vm", error);
    }

    /// Fails create submissions.
    pub fn fail_create(&self, error: ControlPlaneError) {
        self.fail("create_vm", error);
    }

    /// Fails start submissions.
    pub fn fail_start(&self, error: ControlPlaneError) {
        self.fail("start_vm", error);
    }

    /// Fails configuration updates.
    pub fn fail_update(&self, error: ControlPlaneError) {
        self.fail("update_config", error);
    }

    /// Fails identifier allocation.
    pub fn fail_next_id(&self, error: ControlPlaneError) {
        self.fail("next_free_id", error);
    }

    /// Fails VM listing, and with it node lookup.
    pub fn fail_list(&self, error: ControlPlaneError) {
        self.fail("list_vms", error);
    }

    /// Names of the trait methods called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.state).calls.clone()
    }

    /// Number of remote calls made so far.
    #[must_use]
    pub fn remote_call_count(&self) -> usize {
        lock(&self.state).calls.len()
    }

    /// Clone submissions in order.
    #[must_use]
    pub fn clones(&self) -> Vec<RecordedClone> {
        lock(&self.state).clones.clone()
    }

    /// Create submissions in order.
    #[must_use]
    pub fn creates(&self) -> Vec<RecordedCreate> {
        lock(&self.state).creates.clone()
    }

    /// Configuration updates in order.
    #[must_use]
    pub fn updates(&self) -> Vec<(u32, ConfigParams)> {
        lock(&self.state).updates.clone()
    }

    /// Identifiers a start was submitted for.
    #[must_use]
    pub fn started(&self) -> Vec<u32> {
        lock(&self.state).started.clone()
    }

    fn vm_on(state: &PlaneState, node: &Node, vmid: u32) -> Result<ScriptedVm, ControlPlaneError> {
        state
            .vms
            .get(&vmid)
            .filter(|vm| &vm.node == node)
            .cloned()
            .ok_or_else(|| {
                ControlPlaneError::NotFound(format!("Configuration file 'qemu-server/{vmid}.conf' does not exist"))
            })
    }
}

/// Builds a guest interface carrying the given IPv4 addresses.
#[must_use]
pub fn guest_interface(name: &str, ipv4: &[&str]) -> GuestInterface {
    GuestInterface {
        name: name.to_owned(),
        hardware_address: None,
        ip_addresses: ipv4
            .iter()
            .map(|ip| GuestIpAddress {
                ip_address: (*ip).to_owned(),
                ip_address_type: String::from("ipv4"),
                prefix: Some(24),
            })
            .collect(),
    }
}

impl ControlPlane for ScriptedControlPlane {
    fn version(&self) -> ControlPlaneFuture<'_, VersionInfo> {
        Box::pin(async move {
            lock(&self.state).enter("version")?;
            Ok(VersionInfo {
                version: String::from("8.2.4"),
                release: String::from("8.2"),
                repoid: String::from("scripted"),
            })
        })
    }

    fn list_nodes(&self) -> ControlPlaneFuture<'_, Vec<NodeSummary>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("list_nodes")?;
            let nodes: BTreeSet<Node> = state.vms.values().map(|vm| vm.node.clone()).collect();
            Ok(nodes
                .into_iter()
                .map(|node| NodeSummary {
                    node,
                    status: String::from("online"),
                })
                .collect())
        })
    }

    fn list_vms<'a>(&'a self, node: Option<&'a Node>) -> ControlPlaneFuture<'a, Vec<VmSummary>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("list_vms")?;
            Ok(state
                .vms
                .iter()
                .filter(|(_, vm)| node.is_none_or(|wanted| &vm.node == wanted))
                .map(|(vmid, vm)| VmSummary {
                    vmid: *vmid,
                    name: Some(vm.name.clone()),
                    node: vm.node.clone(),
                    status: vm.status.clone(),
                    template: vm.template,
                    cpus: vm.cpus,
                    maxmem: vm.maxmem,
                    maxdisk: vm.maxdisk,
                })
                .collect())
        })
    }

    fn next_free_id(&self) -> ControlPlaneFuture<'_, u32> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("next_free_id")?;
            let mut candidate = state.next_id;
            while state.vms.contains_key(&candidate) {
                candidate = candidate.saturating_add(1);
            }
            Ok(candidate)
        })
    }

    fn vm_config<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmConfig> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("vm_config")?;
            let vm = Self::vm_on(&state, node, vmid)?;
            let mut document = vm.config;
            document.insert(String::from("name"), Value::String(vm.name));
            if vm.template {
                document.insert(String::from("template"), json!(1));
            }
            Ok(VmConfig::new(document))
        })
    }

    fn vm_status<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, VmStatus> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("vm_status")?;
            let vm = Self::vm_on(&state, node, vmid)?;
            let running = vm.status == "running";
            Ok(VmStatus {
                status: vm.status,
                uptime: vm.uptime,
                name: Some(vm.name),
                cpu: running.then(|| serde_json::Number::from(0)),
                mem: running.then_some(512 * 1024 * 1024),
                maxmem: vm.maxmem,
            })
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
            let mut state = lock(&self.state);
            state.enter("clone_vm")?;
            if state.vms.contains_key(&new_id) {
                return Err(ControlPlaneError::AlreadyExists(format!(
                    "VM {new_id} already exists"
                )));
            }
            state.clones.push(RecordedClone {
                node: node.clone(),
                source,
                new_id,
                options: options.clone(),
            });
            let target = options.target.clone().unwrap_or_else(|| node.clone());
            state.vms.insert(
                new_id,
                ScriptedVm::new(target, options.name.clone(), false, "stopped"),
            );
            Ok(state.submit(node, "qmclone", source))
        })
    }

    fn create_vm<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, TaskHandle> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("create_vm")?;
            if state.vms.contains_key(&vmid) {
                return Err(ControlPlaneError::AlreadyExists(format!(
                    "VM {vmid} already exists"
                )));
            }
            state.creates.push(RecordedCreate {
                node: node.clone(),
                vmid,
                params: params.clone(),
            });
            state.vms.insert(
                vmid,
                ScriptedVm::new(
                    node.clone(),
                    params.get("name").unwrap_or_default().to_owned(),
                    false,
                    "stopped",
                ),
            );
            Ok(state.submit(node, "qmcreate", vmid))
        })
    }

    fn start_vm<'a>(&'a self, node: &'a Node, vmid: u32) -> ControlPlaneFuture<'a, TaskHandle> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("start_vm")?;
            if let Some(vm) = state.vms.get_mut(&vmid) {
                vm.status = String::from("running");
                vm.uptime = Some(0);
            }
            state.started.push(vmid);
            Ok(state.submit(node, "qmstart", vmid))
        })
    }

    fn update_config<'a>(
        &'a self,
        node: &'a Node,
        vmid: u32,
        params: &'a ConfigParams,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("update_config")?;
            Self::vm_on(&state, node, vmid)?;
            state.updates.push((vmid, params.clone()));
            Ok(())
        })
    }

    fn task_status<'a>(&'a self, handle: &'a TaskHandle) -> ControlPlaneFuture<'a, TaskStatus> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("task_status")?;
            let scripted = state
                .task_scripts
                .get_mut(&handle.upid)
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| Ok(state.default_task.clone()))
        })
    }

    fn guest_interfaces<'a>(
        &'a self,
        _node: &'a Node,
        vmid: u32,
    ) -> ControlPlaneFuture<'a, Option<Vec<GuestInterface>>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.enter("guest_interfaces")?;
            Ok(state.guest_interfaces.get(&vmid).cloned().flatten())
        })
    }
}

/// Audit sink that keeps records in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records written so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        lock(&self.records).clone()
    }

    /// Serialised records, convenient for field assertions.
    #[must_use]
    pub fn records_json(&self) -> Vec<Value> {
        self.records()
            .iter()
            .map(|record| serde_json::to_value(record).unwrap_or(Value::Null))
            .collect()
    }

    /// Makes subsequent writes fail.
    pub fn fail_writes(&self) {
        *lock(&self.failing) = true;
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if *lock(&self.failing) {
            return Err(AuditError::Io {
                path: String::from("memory"),
                message: String::from("simulated write failure"),
            });
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }
}

/// Port prober that answers from a table instead of the network.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProber {
    reports: Arc<Mutex<HashMap<u16, ProbeReport>>>,
    probes: Arc<Mutex<Vec<(String, u16)>>>,
}

impl ScriptedProber {
    /// Creates a prober that reports every port as refusing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `port` as open with a 3 ms latency.
    #[must_use]
    pub fn with_open(self, port: u16) -> Self {
        self.with_report(port, ProbeReport::open(port, std::time::Duration::from_millis(3)))
    }

    /// Answers probes of `port` with `report`.
    #[must_use]
    pub fn with_report(self, port: u16, report: ProbeReport) -> Self {
        lock(&self.reports).insert(port, report);
        self
    }

    /// Probes made so far as `(host, port)`.
    #[must_use]
    pub fn probes(&self) -> Vec<(String, u16)> {
        lock(&self.probes).clone()
    }
}

impl PortProber for ScriptedProber {
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> ProbeFuture<'a> {
        Box::pin(async move {
            lock(&self.probes).push((host.to_owned(), port));
            lock(&self.reports)
                .get(&port)
                .cloned()
                .unwrap_or_else(|| ProbeReport::refused(port))
        })
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len().saturating_add(1));
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
