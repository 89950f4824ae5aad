//! Upload of rendered user-data to the hypervisor's snippet storage.

use std::ffi::OsString;

use shell_escape::unix::escape;

use crate::command::CommandRunner;
use crate::config::ProvisionConfig;

use super::GuestInitError;

/// Destination for rendered user-data documents.
pub trait SnippetStore: Send + Sync {
    /// Stores `contents` as the user-data for `vmid` and returns the storage
    /// volume reference (for example `local:snippets/user-data-vm200.yml`).
    ///
    /// # Errors
    ///
    /// Returns [`GuestInitError`] when the upload fails.
    fn upload(&self, vmid: u32, contents: &str) -> Result<String, GuestInitError>;
}

/// File name used for the user-data snippet of `vmid`.
#[must_use]
pub fn snippet_file_name(vmid: u32) -> String {
    format!("user-data-vm{vmid}.yml")
}

/// Writes snippets on the hypervisor host through `ssh`.
#[derive(Clone, Debug)]
pub struct SshSnippetStore<R: CommandRunner> {
    runner: R,
    ssh_bin: String,
    destination: String,
    directory: String,
    storage: String,
}

impl<R: CommandRunner> SshSnippetStore<R> {
    /// Creates a store targeting `user@host`.
    #[must_use]
    pub fn new(
        runner: R,
        host: impl Into<String>,
        user: &str,
        directory: impl Into<String>,
        storage: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            ssh_bin: String::from("ssh"),
            destination: format!("{user}@{}", host.into()),
            directory: directory.into(),
            storage: storage.into(),
        }
    }

    /// Builds a store from the snippet settings, if a snippet host is set.
    #[must_use]
    pub fn from_config(runner: R, config: &ProvisionConfig) -> Option<Self> {
        let host = config
            .snippet_host
            .as_deref()
            .filter(|value| !value.trim().is_empty())?;
        Some(
            Self::new(
                runner,
                host.trim(),
                &config.snippet_user,
                &config.snippet_dir,
                &config.snippet_storage,
            )
            .with_ssh_bin(&config.ssh_bin),
        )
    }

    /// Overrides the `ssh` executable.
    #[must_use]
    pub fn with_ssh_bin(mut self, ssh_bin: impl Into<String>) -> Self {
        self.ssh_bin = ssh_bin.into();
        self
    }

    fn remote_command(&self, vmid: u32, contents: &str) -> String {
        let directory = self.directory.trim_end_matches('/');
        let path = format!("{directory}/{}", snippet_file_name(vmid));
        format!(
            "mkdir -p {} && printf '%s' {} > {}",
            escape(directory.into()),
            escape(contents.into()),
            escape(path.as_str().into())
        )
    }
}

impl<R: CommandRunner> SnippetStore for SshSnippetStore<R> {
    fn upload(&self, vmid: u32, contents: &str) -> Result<String, GuestInitError> {
        let args = [
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from(&self.destination),
            OsString::from(self.remote_command(vmid, contents)),
        ];
        let output = self.runner.run(&self.ssh_bin, &args)?;
        if !output.is_success() {
            let status_text = output
                .code
                .map_or_else(|| String::from("unknown"), |code| code.to_string());
            return Err(GuestInitError::Upload {
                host: self.destination.clone(),
                status_text,
                stderr: output.stderr,
            });
        }
        Ok(format!("{}:snippets/{}", self.storage, snippet_file_name(vmid)))
    }
}
