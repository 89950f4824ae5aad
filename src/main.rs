//! Binary entry point for the `vmforge` CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::info;

use vmforge::{
    BatchExecutor, CloneRequest, ConfigError, ControlPlaneError, CreateRequest, ErrorKind,
    Inventory, JsonLinesAuditSink, Node, OsType, ProcessCommandRunner, ProvisionConfig, ProvisionError,
    Provisioner, ProvisioningRequest, ProvisioningResult, ProxmoxClient, ProxmoxConfig,
    SshSnippetStore, TcpPortProber, TemplateInfo, ValidationEngine, ValidationSettings, logging,
    validate_clone_request, validate_create_request,
};

use cli::{CheckCommand, Cli, RequestFile, TemplatesCommand, ValidateCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to read {path}: {message}")]
    Input { path: String, message: String },
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
    #[error("failed to write output: {0}")]
    Output(String),
}

/// JSON document printed by `templates`.
#[derive(Serialize)]
struct TemplateListing<'a> {
    templates: &'a [TemplateInfo],
    count: usize,
}

/// JSON document printed when a request or query fails.
#[derive(Serialize)]
struct FailureOutput<'a> {
    success: bool,
    error: String,
    kind: ErrorKind,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a ProvisioningResult>,
}

/// JSON document printed by `validate --quick`.
#[derive(Serialize)]
struct QuickCheckOutput {
    vmid: u32,
    running: bool,
}

type LiveProvisioner = Provisioner<ProxmoxClient, JsonLinesAuditSink>;

#[tokio::main]
async fn main() {
    if let Err(err) = logging::init("info") {
        writeln!(io::stderr(), "{err}").ok();
    }
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Check(command) => check(&command, io::stdout()),
        Cli::Create(args) => {
            let request: CreateRequest = read_json(&args.file)?;
            let provisioner = build_provisioner(&args)?;
            report_outcome(&provisioner.create_vm(&request).await, io::stdout())
        }
        Cli::Clone(args) => {
            let request: CloneRequest = read_json(&args.file)?;
            let provisioner = build_provisioner(&args)?;
            report_outcome(
                &provisioner.clone_from_template(&request).await,
                io::stdout(),
            )
        }
        Cli::Batch(args) => {
            let requests: Vec<ProvisioningRequest> = read_json(&args.file)?;
            let provisioner = build_provisioner(&args)?;
            let report = BatchExecutor::new(&provisioner).run_batch(&requests).await;
            write_json(io::stdout(), &report)?;
            Ok(i32::from(report.failed > 0))
        }
        Cli::Validate(command) => validate(&command).await,
        Cli::Templates(command) => list_templates(&command).await,
        Cli::Template(args) => {
            let inventory = connect_inventory().await?;
            report_outcome(&inventory.template_details(args.vmid).await, io::stdout())
        }
        Cli::Info(args) => {
            let inventory = connect_inventory().await?;
            report_outcome(&inventory.vm_info(args.vmid).await, io::stdout())
        }
        Cli::Status(args) => {
            let inventory = connect_inventory().await?;
            report_outcome(&inventory.vm_status(args.vmid).await, io::stdout())
        }
        Cli::Cluster => {
            let (proxmox, _) = load_configs()?;
            let inventory = Inventory::new(ProxmoxClient::new(&proxmox)?);
            let status = inventory.cluster_status(&proxmox.host).await;
            write_json(io::stdout(), &status)?;
            Ok(i32::from(!status.connected))
        }
    }
}

async fn list_templates(command: &TemplatesCommand) -> Result<i32, CliError> {
    let inventory = connect_inventory().await?;
    let node = command.node.as_deref().map(Node::from);
    match inventory.list_templates(node.as_ref()).await {
        Ok(templates) => {
            write_json(
                io::stdout(),
                &TemplateListing {
                    count: templates.len(),
                    templates: &templates,
                },
            )?;
            Ok(0)
        }
        Err(err) => report_outcome::<TemplateInfo>(&Err(err), io::stdout()),
    }
}

fn check(command: &CheckCommand, out: impl Write) -> Result<i32, CliError> {
    let report = if command.clone {
        validate_clone_request(&read_json::<CloneRequest>(&command.file)?)
    } else {
        validate_create_request(&read_json::<CreateRequest>(&command.file)?)
    };
    write_json(out, &report)?;
    Ok(i32::from(!report.valid))
}

async fn validate(command: &ValidateCommand) -> Result<i32, CliError> {
    let (client, config) = connect().await?;
    let engine = ValidationEngine::new(
        client,
        TcpPortProber::new(config.port_connect_timeout()),
        JsonLinesAuditSink::new(config.audit_log_path()),
        ValidationSettings::from(&config),
    )
    .with_actor(command.actor.as_str());

    if command.quick {
        let running = engine.quick_check(command.vmid).await;
        write_json(
            io::stdout(),
            &QuickCheckOutput {
                vmid: command.vmid,
                running,
            },
        )?;
        return Ok(i32::from(!running));
    }

    let os_type = OsType::from(command.os.as_str());
    let result = engine
        .validate(command.vmid, &os_type, command.timeout.map(Duration::from_secs))
        .await;
    write_json(io::stdout(), &result)?;
    Ok(i32::from(!result.is_healthy()))
}

fn load_configs() -> Result<(ProxmoxConfig, ProvisionConfig), CliError> {
    let proxmox = ProxmoxConfig::load_without_cli_args()?;
    proxmox.validate()?;
    let config = ProvisionConfig::load_without_cli_args()?;
    config.validate()?;
    Ok((proxmox, config))
}

async fn connect() -> Result<(ProxmoxClient, ProvisionConfig), CliError> {
    let (proxmox, config) = load_configs()?;
    let client = ProxmoxClient::connect(&proxmox).await?;
    Ok((client, config))
}

async fn connect_inventory() -> Result<Inventory<ProxmoxClient>, CliError> {
    let (client, _) = connect().await?;
    Ok(Inventory::new(client))
}

/// Builds the provisioner without contacting the cluster, so that an
/// unreachable hypervisor surfaces inside the audited operation.
fn build_provisioner(args: &RequestFile) -> Result<LiveProvisioner, CliError> {
    let (proxmox, config) = load_configs()?;
    let client = ProxmoxClient::new(&proxmox)?;
    let audit = JsonLinesAuditSink::new(config.audit_log_path());
    let snippets = SshSnippetStore::from_config(ProcessCommandRunner, &config);
    let provisioner = Provisioner::new(client, audit, config).with_actor(args.actor.as_str());
    Ok(match snippets {
        Some(store) => {
            info!("delivering cloud-init payloads as snippets");
            provisioner.with_snippet_store(Arc::new(store))
        }
        None => provisioner,
    })
}

fn report_outcome<T: Serialize>(
    outcome: &Result<T, ProvisionError>,
    out: impl Write,
) -> Result<i32, CliError> {
    match outcome {
        Ok(result) => {
            write_json(out, result)?;
            Ok(0)
        }
        Err(err) => {
            let kind = err.kind();
            write_json(
                out,
                &FailureOutput {
                    success: false,
                    error: err.to_string(),
                    kind,
                    status_code: kind.status_code(),
                    result: err.partial_result(),
                },
            )?;
            Ok(1)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CliError> {
    let input_error = |message: String| CliError::Input {
        path: path.to_string(),
        message,
    };
    let (dir_path, file_name) = match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(input_error(String::from("path has no file name"))),
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| input_error(err.to_string()))?;
    let contents = dir
        .read_to_string(file_name)
        .map_err(|err| input_error(err.to_string()))?;
    serde_json::from_str(&contents).map_err(|err| input_error(err.to_string()))
}

fn write_json(mut out: impl Write, value: &impl Serialize) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut out, value)
        .map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(out).map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;
    use vmforge::LifecycleStatus;

    fn request_file(dir: &TempDir, body: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("request.json"))
            .expect("temp paths are UTF-8");
        std::fs::write(&path, body).expect("write request");
        path
    }

    fn rendered(buffer: Vec<u8>) -> serde_json::Value {
        serde_json::from_slice(&buffer).expect("output is JSON")
    }

    #[rstest]
    #[case(r#"{"name": "web-01"}"#, false, 0)]
    #[case(r#"{"name": "web-01", "memory": 256, "disk_size": 4}"#, false, 1)]
    #[case(r#"{"source_vmid": 9000, "name": "web-02"}"#, true, 0)]
    fn check_reports_preflight_issues(
        #[case] body: &str,
        #[case] clone: bool,
        #[case] expected_code: i32,
    ) {
        let dir = TempDir::new().expect("tempdir");
        let command = CheckCommand {
            file: request_file(&dir, body),
            clone,
        };
        let mut buffer = Vec::new();

        let code = check(&command, &mut buffer).expect("check runs");

        assert_eq!(code, expected_code);
        let report = rendered(buffer);
        assert_eq!(report["valid"], expected_code == 0);
    }

    #[test]
    fn check_rejects_malformed_documents() {
        let dir = TempDir::new().expect("tempdir");
        let command = CheckCommand {
            file: request_file(&dir, "{not json"),
            clone: false,
        };

        let err = check(&command, Vec::new()).expect_err("malformed JSON should fail");

        assert!(matches!(err, CliError::Input { .. }), "unexpected error: {err}");
    }

    #[test]
    fn report_outcome_prints_partial_result() {
        let result = ProvisioningResult {
            vmid: 210,
            name: String::from("web-03"),
            node: String::from("pve"),
            status: LifecycleStatus::Created,
            message: String::from("VM 210 cloned successfully"),
            task_id: None,
        };
        let outcome: Result<ProvisioningResult, ProvisionError> = Err(ProvisionError::PartiallyProvisioned(Box::new(
            vmforge::provision::PartialProvision {
                result,
                stage: vmforge::provision::ProvisionStage::Customization,
                reason: String::from("update rejected"),
            },
        )));
        let mut buffer = Vec::new();

        let code = report_outcome(&outcome, &mut buffer).expect("report renders");

        assert_eq!(code, 1);
        let document = rendered(buffer);
        assert_eq!(document["kind"], "partial_success");
        assert_eq!(document["status_code"], 400);
        assert_eq!(document["result"]["vmid"], 210);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Output(String::from("broken pipe"));
        write_error(&mut buf, &err);
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("broken pipe"), "rendered: {text}");
    }
}
