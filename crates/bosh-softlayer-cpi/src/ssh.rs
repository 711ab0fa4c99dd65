//! Remote shell execution on guests.

use async_trait::async_trait;
use softlayer_cpi_core::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs shell commands on a guest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SshClient: Send + Sync {
    /// Run `command` as `user` on `host` and return its stdout.
    async fn exec(&self, user: &str, password: &str, host: &str, command: &str) -> Result<String>;
}

/// [`SshClient`] driving the `ssh` binary through `sshpass`.
///
/// The password travels in the `SSHPASS` environment variable, never on the command line.
#[derive(Debug, Clone)]
pub struct SshpassClient {
    program: String,
    connect_timeout_secs: u64,
}

impl Default for SshpassClient {
    fn default() -> Self {
        Self {
            program: "sshpass".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

impl SshpassClient {
    /// Client using `sshpass` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different `sshpass` executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, user: &str, host: &str, command: &str) -> Vec<String> {
        vec![
            "-e".to_string(),
            "ssh".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{user}@{host}"),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl SshClient for SshpassClient {
    async fn exec(&self, user: &str, password: &str, host: &str, command: &str) -> Result<String> {
        debug!(host, user, "Running remote command");

        let output = Command::new(&self.program)
            .args(self.args(user, host, command))
            .env("SSHPASS", password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| Error::GuestCommand(format!("Starting ssh to {host}: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::GuestCommand(stderr.trim_end().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
