//! Terraform-backed provisioning of the transient build/test topology.
//!
//! The topology itself (key pair, security groups, bucket, hosts) is
//! declared in the Terraform working directory; this module only binds
//! variables, invokes the tool, and parses its outputs. Convergence and
//! diffing are Terraform's own semantics, not re-implemented here.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Which compute instances the topology should include. The bucket, key
/// pair and network resources are always present.
#[derive(Debug, Clone, Copy)]
pub struct HostSelection {
    pub test_host: bool,
    pub build_host: bool,
    pub pxe_server: bool,
}

impl Default for HostSelection {
    fn default() -> Self {
        Self {
            test_host: true,
            build_host: false,
            pxe_server: false,
        }
    }
}

impl HostSelection {
    /// Selection with every instance disabled, used for compute-only teardown.
    pub fn none() -> Self {
        Self {
            test_host: false,
            build_host: false,
            pxe_server: false,
        }
    }
}

/// The two teardown operations. Deliberately distinct so that removing
/// compute can never be mistyped into destroying the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Everything, including the bucket and its contents.
    All,
    /// Compute instances only; bucket, key pair and network stay.
    ComputeOnly,
}

pub struct TerraformCli {
    work_dir: PathBuf,
    profile: String,
    region: String,
}

impl TerraformCli {
    pub fn new(work_dir: &Path, profile: &str, region: &str) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            profile: profile.to_string(),
            region: region.to_string(),
        }
    }

    fn var_args(&self, hosts: HostSelection) -> Vec<String> {
        vec![
            "-var".to_string(),
            format!("profile={}", self.profile),
            "-var".to_string(),
            format!("region={}", self.region),
            "-var".to_string(),
            format!("enable_test_host={}", hosts.test_host),
            "-var".to_string(),
            format!("enable_build_host={}", hosts.build_host),
            "-var".to_string(),
            format!("enable_pxe_server={}", hosts.pxe_server),
        ]
    }

    pub fn init_args(&self) -> Vec<String> {
        vec!["init".to_string(), "-input=false".to_string()]
    }

    pub fn apply_args(&self, hosts: HostSelection) -> Vec<String> {
        let mut args = vec![
            "apply".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        args.extend(self.var_args(hosts));
        args
    }

    pub fn destroy_all_args(&self) -> Vec<String> {
        let mut args = vec![
            "destroy".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        args.extend(self.var_args(HostSelection::none()));
        args
    }

    /// Compute-only teardown is a converging apply with every instance
    /// disabled, never a `destroy` — the bucket must survive it.
    pub fn destroy_compute_args(&self) -> Vec<String> {
        self.apply_args(HostSelection::none())
    }

    pub fn output_args(&self) -> Vec<String> {
        vec!["output".to_string(), "-json".to_string()]
    }

    async fn run_streaming(&self, args: &[String]) -> Result<()> {
        info!(target: "infra", dir = %self.work_dir.display(), cmd = %args.join(" "), "terraform");
        let status = Command::new("terraform")
            .current_dir(&self.work_dir)
            .args(args)
            .stdin(Stdio::null())
            .status()
            .await
            .context("spawning terraform")?;
        if !status.success() {
            bail!("terraform {} failed", args.first().map(String::as_str).unwrap_or(""));
        }
        Ok(())
    }

    pub async fn init(&self) -> Result<()> {
        self.run_streaming(&self.init_args()).await
    }

    pub async fn apply(&self, hosts: HostSelection) -> Result<()> {
        self.init().await?;
        self.run_streaming(&self.apply_args(hosts)).await
    }

    pub async fn destroy(&self, mode: Teardown) -> Result<()> {
        match mode {
            Teardown::All => {
                info!(target: "infra", "destroying entire topology (including bucket)");
                self.run_streaming(&self.destroy_all_args()).await
            }
            Teardown::ComputeOnly => {
                info!(target: "infra", "removing compute instances; bucket and network stay");
                self.run_streaming(&self.destroy_compute_args()).await
            }
        }
    }

    /// Read and parse the current outputs from Terraform state.
    pub async fn outputs(&self) -> Result<InfraOutputs> {
        read_outputs(&self.work_dir).await
    }
}

/// Read outputs from an existing state without binding any variables.
/// Used wherever only the addresses are needed (no profile/region).
pub async fn read_outputs(work_dir: &Path) -> Result<InfraOutputs> {
    let output = Command::new("terraform")
        .current_dir(work_dir)
        .args(["output", "-json"])
        .output()
        .await
        .context("spawning terraform output")?;
    if !output.status.success() {
        bail!(
            "terraform output failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    InfraOutputs::from_json(&String::from_utf8_lossy(&output.stdout))
}

/// One entry of `terraform output -json`.
#[derive(Debug, Deserialize)]
struct RawOutput {
    value: serde_json::Value,
}

/// Named outputs resolved after provisioning. Read-only for the rest of
/// the run.
#[derive(Debug, Clone, Default)]
pub struct InfraOutputs {
    pub test_host_ip: Option<String>,
    pub build_host_ip: Option<String>,
    pub pxe_server_ip: Option<String>,
    pub bucket: Option<String>,
    pub ssh_private_key: Option<String>,
}

impl InfraOutputs {
    /// Parse `terraform output -json`. An empty output set means nothing
    /// was ever provisioned — callers on the `--skip-infra` path must
    /// fail before any build step, so that is an error here.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, RawOutput> =
            serde_json::from_str(json).context("parsing terraform outputs")?;
        if raw.is_empty() {
            bail!("no infrastructure outputs found; provision first or drop --skip-infra");
        }

        let get = |name: &str| -> Option<String> {
            raw.get(name)
                .and_then(|o| o.value.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            test_host_ip: get("test_host_public_ip"),
            build_host_ip: get("build_host_public_ip"),
            pxe_server_ip: get("pxe_server_public_ip"),
            bucket: get("image_bucket"),
            ssh_private_key: get("ssh_private_key_pem"),
        })
    }

    pub fn require_test_host(&self) -> Result<&str> {
        self.test_host_ip
            .as_deref()
            .context("no test host address in outputs (was it provisioned with enable_test_host?)")
    }

    pub fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .context("no bucket name in outputs")
    }

    /// Write the generated SSH private key to `path` with owner-only
    /// permissions. Skipped with a warning when the output is absent
    /// (e.g. a topology provisioned with an externally managed key).
    pub async fn write_private_key(&self, path: &Path) -> Result<bool> {
        let Some(key) = self.ssh_private_key.as_deref() else {
            warn!(target: "infra", "no ssh_private_key_pem output; keeping existing key file");
            return Ok(false);
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("creating key directory")?;
        }
        tokio::fs::write(path, key)
            .await
            .context("writing ssh key file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .context("restricting ssh key permissions")?;
        }

        info!(target: "infra", path = %path.display(), "ssh key written");
        Ok(true)
    }
}
