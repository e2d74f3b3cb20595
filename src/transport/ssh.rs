use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ExecOutput, Transport};
use crate::retry::{retry, RetryPolicy};

/// Reachability wait: 30 attempts x 10s covers instance boot + cloud-init ssh start
const REACHABILITY_RETRY: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(10));

const CONNECT_TIMEOUT_SECS: u32 = 10;

/// SSH/SCP transport to a single remote host.
#[derive(Debug, Clone)]
pub struct SshTransport {
    user: String,
    host: String,
    key_path: PathBuf,
    port: u16,
}

impl SshTransport {
    pub fn new(user: &str, host: &str, key_path: &Path) -> Self {
        Self {
            user: user.to_string(),
            host: host.to_string(),
            key_path: key_path.to_path_buf(),
            port: 22,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Options shared by ssh and scp. Host keys of throwaway instances are
    /// never pinned, so verification is disabled.
    fn common_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
        ]
    }

    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-p".to_string());
        args.push(self.port.to_string());
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    pub fn scp_to_args(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.destination(), remote));
        args
    }

    pub fn scp_from_args(&self, remote: &str, local: &Path) -> Vec<String> {
        let mut args = self.common_options();
        args.push("-P".to_string());
        args.push(self.port.to_string());
        args.push(format!("{}:{}", self.destination(), remote));
        args.push(local.display().to_string());
        args
    }

    /// Poll until the host accepts SSH commands.
    pub async fn wait_reachable(&self) -> Result<()> {
        info!(target: "transport", host = %self.host, "waiting for SSH reachability");
        retry(REACHABILITY_RETRY, "ssh reachability", || async move {
            let out = self.exec("true").await?;
            if out.success() {
                Ok(())
            } else {
                anyhow::bail!("ssh probe exited {}", out.exit_code)
            }
        })
        .await?;
        info!(target: "transport", host = %self.host, "host reachable");
        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        debug!(target: "transport", host = %self.host, command, "ssh exec");
        let output = Command::new("ssh")
            .args(self.ssh_args(command))
            .output()
            .await
            .context("spawning ssh")?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        debug!(target: "transport", host = %self.host, local = %local.display(), remote, "scp upload");
        let output = Command::new("scp")
            .args(self.scp_to_args(local, remote))
            .output()
            .await
            .context("spawning scp")?;
        if !output.status.success() {
            anyhow::bail!(
                "scp {} -> {} failed: {}",
                local.display(),
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        debug!(target: "transport", host = %self.host, remote, local = %local.display(), "scp download");
        let output = Command::new("scp")
            .args(self.scp_from_args(remote, local))
            .output()
            .await
            .context("spawning scp")?;
        if !output.status.success() {
            anyhow::bail!(
                "scp {} -> {} failed: {}",
                remote,
                local.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
