//! Command execution and file transfer over an authenticated channel.
//!
//! Production code talks to the build host through `ssh`/`scp`; tests
//! substitute a scripted implementation to observe the exact command
//! sequence a stage issues.

pub mod ssh;

pub use ssh::SshTransport;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Output of a remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a shell command on the remote side and collect its output.
    ///
    /// A non-zero exit is NOT an error at this layer; callers decide
    /// whether it is fatal (see [`exec_checked`]).
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Copy a local file to a remote path.
    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy a remote file to a local path.
    async fn copy_from(&self, remote: &str, local: &Path) -> Result<()>;
}

/// Run a remote command and fail with context when it exits non-zero.
pub async fn exec_checked(transport: &dyn Transport, command: &str) -> Result<ExecOutput> {
    let out = transport.exec(command).await?;
    if !out.success() {
        anyhow::bail!(
            "remote command failed (exit {}): {}\n{}",
            out.exit_code,
            command,
            out.stderr.trim()
        );
    }
    Ok(out)
}
