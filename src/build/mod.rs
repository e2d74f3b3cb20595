//! Remote build orchestration.
//!
//! Drives the image build on the provisioned host as a linear stage
//! sequence over the SSH transport:
//!
//! `environment-setup -> config-render -> packer-invoke ->
//!  format-conversion -> boot-file-extraction`
//!
//! Every stage is re-run-safe: setup checks before installing, renders
//! overwrite, and Packer/qemu-img outputs are keyed by the run timestamp.

pub mod extract;
pub mod template;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::params::BuildParams;
use crate::retry::{retry, RetryPolicy};
use crate::transport::{exec_checked, Transport};
use template::Credential;

/// Remote working directory, relative to the build user's home.
pub const REMOTE_WORK_DIR: &str = "nodeforge-build";
/// Where Packer and the converters leave their artifacts.
pub const REMOTE_OUTPUT_DIR: &str = "nodeforge-build/output";

const RECIPE_DIR: &str = "nodeforge-build/recipe";
const RECIPE_SUBDIR: &str = "images/capi/packer/qemu";

/// apt is the one known-flaky collaborator (dpkg lock, mirror hiccups)
const APT_RETRY: RetryPolicy = RetryPolicy::new(5, Duration::from_secs(10));

const BASE_PACKAGES: &str =
    "qemu-utils qemu-system-arm git curl gnupg lsb-release cloud-image-utils";

pub struct RemoteBuild<'a> {
    transport: &'a dyn Transport,
    params: &'a BuildParams,
}

impl<'a> RemoteBuild<'a> {
    pub fn new(transport: &'a dyn Transport, params: &'a BuildParams) -> Self {
        Self { transport, params }
    }

    /// Path of the primary artifact on the remote host.
    pub fn primary_image(&self) -> String {
        format!("{}/{}", REMOTE_OUTPUT_DIR, self.params.image_file("qcow2"))
    }

    /// Run the full stage sequence. `log_path` receives the Packer log.
    pub async fn run(&self, log_path: &Path) -> Result<()> {
        self.ensure_tooling().await?;
        self.render_and_stage_configs().await?;
        self.run_packer(log_path).await?;
        self.convert_formats().await?;
        extract::extract_boot_files(self.transport, &self.primary_image(), REMOTE_OUTPUT_DIR)
            .await?;
        info!(target: "build", output = REMOTE_OUTPUT_DIR, "build complete");
        Ok(())
    }

    /// Install build tooling and clone the recipe repo, both only when
    /// absent.
    async fn ensure_tooling(&self) -> Result<()> {
        let have_base = self
            .transport
            .exec("command -v qemu-img >/dev/null && command -v git >/dev/null")
            .await?
            .success();
        if !have_base {
            info!(target: "build", "installing base packages");
            retry(APT_RETRY, "base package installation", || async move {
                exec_checked(
                    self.transport,
                    &format!(
                        "sudo apt-get update -y && \
                         sudo DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                        BASE_PACKAGES
                    ),
                )
                .await?;
                Ok(())
            })
            .await?;
        }

        let have_packer = self
            .transport
            .exec("command -v packer >/dev/null")
            .await?
            .success();
        if !have_packer {
            info!(target: "build", "installing packer from the hashicorp repository");
            retry(APT_RETRY, "packer installation", || async move {
                exec_checked(
                    self.transport,
                    "curl -fsSL https://apt.releases.hashicorp.com/gpg \
                       | sudo gpg --dearmor --yes -o /usr/share/keyrings/hashicorp.gpg && \
                     echo \"deb [signed-by=/usr/share/keyrings/hashicorp.gpg] \
                       https://apt.releases.hashicorp.com $(lsb_release -cs) main\" \
                       | sudo tee /etc/apt/sources.list.d/hashicorp.list >/dev/null && \
                     sudo apt-get update -y && \
                     sudo DEBIAN_FRONTEND=noninteractive apt-get install -y packer",
                )
                .await?;
                Ok(())
            })
            .await?;
        }

        // Recipe repo: clone only if absent, shallow is enough
        exec_checked(
            self.transport,
            &format!(
                "test -d {dir} || git clone --depth 1 {repo} {dir}",
                dir = RECIPE_DIR,
                repo = self.params.recipe_repo
            ),
        )
        .await?;

        Ok(())
    }

    /// Render the Packer vars file and the cloud-init seed pair locally,
    /// then stage them into the remote working directory.
    async fn render_and_stage_configs(&self) -> Result<()> {
        info!(target: "build", "rendering build configuration");

        let credential = Credential::generate();
        let staging = tempfile::tempdir().context("creating local staging dir")?;

        let files = [
            ("vars.pkrvars.hcl", template::render_packer_vars(self.params)),
            (
                "user-data",
                template::render_user_data(self.params, &credential),
            ),
            ("meta-data", template::render_meta_data(self.params)),
        ];

        exec_checked(
            self.transport,
            &format!("mkdir -p {} {}", REMOTE_WORK_DIR, REMOTE_OUTPUT_DIR),
        )
        .await?;

        for (name, contents) in files {
            let local = staging.path().join(name);
            tokio::fs::write(&local, contents)
                .await
                .with_context(|| format!("writing {}", name))?;
            self.transport
                .copy_to(&local, &format!("{}/{}", REMOTE_WORK_DIR, name))
                .await?;
        }

        // staging (and the rendered credential with it) is dropped here
        Ok(())
    }

    /// Single synchronous Packer invocation. Failures are not retried;
    /// the tool's own log is the diagnostic.
    async fn run_packer(&self, log_path: &Path) -> Result<()> {
        info!(target: "build", "running packer build (this takes a while)");

        // Older recipe checkouts have no required_plugins block, so init
        // failure is tolerated
        let _ = self
            .transport
            .exec(&format!(
                "cd {} && packer init recipe/{}",
                REMOTE_WORK_DIR, RECIPE_SUBDIR
            ))
            .await;

        let out = self
            .transport
            .exec(&format!(
                "cd {} && packer build -var-file=vars.pkrvars.hcl recipe/{}",
                REMOTE_WORK_DIR, RECIPE_SUBDIR
            ))
            .await?;

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("creating log directory")?;
        }
        tokio::fs::write(log_path, format!("{}\n{}", out.stdout, out.stderr))
            .await
            .context("writing build log")?;

        if !out.success() {
            bail!(
                "packer build failed (exit {}); see {}",
                out.exit_code,
                log_path.display()
            );
        }
        info!(target: "build", log = %log_path.display(), "packer build finished");
        Ok(())
    }

    /// Produce raw and VMDK from the primary qcow2, then bundle the OVA.
    ///
    /// Both transcodes read the primary artifact directly; chaining them
    /// off each other would accumulate conversion drift.
    async fn convert_formats(&self) -> Result<()> {
        let primary = self.primary_image();

        info!(target: "build", "converting image formats");
        exec_checked(
            self.transport,
            &format!(
                "qemu-img convert -O raw {} {}/{}",
                primary,
                REMOTE_OUTPUT_DIR,
                self.params.image_file("raw")
            ),
        )
        .await?;

        exec_checked(
            self.transport,
            &format!(
                "qemu-img convert -O vmdk -o subformat=streamOptimized {} {}/{}",
                primary,
                REMOTE_OUTPUT_DIR,
                self.params.image_file("vmdk")
            ),
        )
        .await?;

        self.package_ova().await
    }

    async fn package_ova(&self) -> Result<()> {
        let base = self.params.artifact_basename();
        let vmdk = self.params.image_file("vmdk");
        let ovf = format!("{}.ovf", base);
        let manifest = format!("{}.mf", base);
        let ova = self.params.image_file("ova");

        // Descriptor needs the exact VMDK size
        let size_out = exec_checked(
            self.transport,
            &format!("stat -c %s {}/{}", REMOTE_OUTPUT_DIR, vmdk),
        )
        .await?;
        let vmdk_size: u64 = size_out
            .stdout
            .trim()
            .parse()
            .context("parsing vmdk size")?;

        let staging = tempfile::tempdir().context("creating local staging dir")?;
        let descriptor = template::render_ovf_descriptor(&base, &vmdk, vmdk_size);
        let ovf_local = staging.path().join(&ovf);
        tokio::fs::write(&ovf_local, &descriptor)
            .await
            .context("writing ovf descriptor")?;
        self.transport
            .copy_to(&ovf_local, &format!("{}/{}", REMOTE_OUTPUT_DIR, ovf))
            .await?;

        // The descriptor was rendered here, so hash it here; only the
        // disk needs a remote pass.
        let sum_out = exec_checked(
            self.transport,
            &format!("cd {} && sha256sum {}", REMOTE_OUTPUT_DIR, vmdk),
        )
        .await?;
        let mut digests = vec![(ovf.clone(), sha256_hex(descriptor.as_bytes()))];
        digests.extend(parse_sha256sum(&sum_out.stdout)?);

        let manifest_local = staging.path().join(&manifest);
        tokio::fs::write(&manifest_local, template::render_ova_manifest(&digests))
            .await
            .context("writing ova manifest")?;
        self.transport
            .copy_to(
                &manifest_local,
                &format!("{}/{}", REMOTE_OUTPUT_DIR, manifest),
            )
            .await?;

        // Descriptor first, then manifest, then disk: OVA readers expect
        // the .ovf as the leading member
        exec_checked(
            self.transport,
            &format!(
                "cd {} && tar -cf {} {} {} {}",
                REMOTE_OUTPUT_DIR, ova, ovf, manifest, vmdk
            ),
        )
        .await?;

        info!(target: "build", ova = %ova, "ova packaged");
        Ok(())
    }

    /// List the artifact files present in the remote output directory.
    pub async fn list_outputs(&self) -> Result<Vec<String>> {
        let out = exec_checked(
            self.transport,
            &format!("ls -1 {}", REMOTE_OUTPUT_DIR),
        )
        .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Parse `sha256sum` output lines (`<digest>  <file>`).
fn parse_sha256sum(stdout: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.split_whitespace();
        let digest = parts.next();
        let file = parts.next();
        match (digest, file) {
            (Some(d), Some(f)) => entries.push((f.to_string(), d.to_string())),
            _ => warn!(target: "build", line, "unparseable sha256sum line"),
        }
    }
    if entries.is_empty() {
        bail!("sha256sum produced no digests");
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sha256sum_lines() {
        let out = "ab12  node.ovf\ncd34  node.vmdk\n";
        let entries = parse_sha256sum(out).unwrap();
        assert_eq!(
            entries,
            vec![
                ("node.ovf".to_string(), "ab12".to_string()),
                ("node.vmdk".to_string(), "cd34".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_sha256sum_rejects_empty() {
        assert!(parse_sha256sum("\n").is_err());
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
