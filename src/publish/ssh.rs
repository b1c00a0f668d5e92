use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Command;

use super::{ReviewCommand, ReviewTransport};
use crate::context::LogContext;
use crate::error::PublishError;

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub key_file: PathBuf,
    pub connect_timeout: Duration,
    /// Upper bound for one remote command, connection setup included.
    pub command_timeout: Duration,
    /// Directory for the multiplexing control socket.
    pub control_dir: PathBuf,
    /// How long the master connection lingers after the last command.
    pub control_persist: Duration,
}

impl SshConfig {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            username: username.into(),
            key_file: key_file.into(),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(120),
            control_dir: std::env::temp_dir(),
            control_persist: Duration::from_secs(600),
        }
    }
}

/// Runs review commands through the system `ssh` client.
///
/// OpenSSH multiplexing keeps one authenticated master connection alive
/// between votes, with keepalives every 60 seconds.
pub struct SshTransport {
    config: SshConfig,
    program: String,
    log: LogContext,
}

impl SshTransport {
    pub fn new(config: SshConfig, log: &LogContext) -> Self {
        let log = log
            .for_component("ssh")
            .with("host", format!("{}:{}", config.hostname, config.port))
            .with("user", &config.username);
        Self {
            config,
            program: "ssh".to_string(),
            log,
        }
    }

    /// Overrides the client binary, e.g. for a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let control_path = self.config.control_dir.join("vote-relay-%r@%h:%p");
        vec![
            "-i".to_string(),
            self.config.key_file.display().to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
            "-l".to_string(),
            self.config.username.clone(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=60".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.config.control_persist.as_secs()),
            self.config.hostname.clone(),
            remote_command.to_string(),
        ]
    }
}

impl ReviewTransport for SshTransport {
    async fn execute(&self, command: &ReviewCommand) -> Result<(), PublishError> {
        let remote = command.to_remote_command();
        debug!("{}: running {}", self.log, remote);

        let mut child = Command::new(&self.program);
        child
            .args(self.ssh_args(&remote))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.command_timeout, child.output())
            .await
            .map_err(|_| PublishError::Timeout(self.config.command_timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(PublishError::Remote {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !stdout.trim().is_empty() {
            warn!("{}: remote stdout: {}", self.log, stdout.trim());
        }
        if !stderr.trim().is_empty() {
            warn!("{}: remote stderr: {}", self.log, stderr.trim());
        }
        Ok(())
    }
}
