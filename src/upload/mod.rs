//! Artifact transfer to object storage.
//!
//! Planning is a pure function over the remote output listing so the
//! degraded-set policy (missing class = warning, not error) is directly
//! testable. Execution shells out to the AWS CLI: artifact copies run on
//! the build host (instance role credentials), the build log copy runs
//! locally with the caller's profile.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

use crate::build::REMOTE_OUTPUT_DIR;
use crate::params::IMAGE_NAME;
use crate::transport::{exec_checked, Transport};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["qcow2", "raw", "vmdk", "ova"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    /// File name inside the remote output directory.
    pub file: String,
    /// Destination object key.
    pub key: String,
}

#[derive(Debug, Default)]
pub struct UploadPlan {
    pub items: Vec<UploadItem>,
    /// Human-readable notes for artifact classes that were not found.
    pub missing: Vec<String>,
}

impl UploadPlan {
    /// Map the output listing onto object keys: the four image encodings
    /// under `images/`, kernel and initrd under `pxe/`. A partial set is
    /// a valid, degraded outcome.
    ///
    /// Classes are matched by extension, not by exact run name, so an
    /// upload can follow a build from an earlier invocation.
    pub fn build(files: &[String]) -> Self {
        let mut plan = Self::default();

        for ext in IMAGE_EXTENSIONS {
            let suffix = format!(".{}", ext);
            match files
                .iter()
                .find(|f| f.starts_with(IMAGE_NAME) && f.ends_with(&suffix))
            {
                Some(file) => plan.items.push(UploadItem {
                    key: format!("images/{}", file),
                    file: file.clone(),
                }),
                None => plan.missing.push(format!("no .{} image in output", ext)),
            }
        }

        for (prefix, what) in [("vmlinuz-", "kernel image"), ("initrd.img-", "initial ramdisk")] {
            match files.iter().find(|f| f.starts_with(prefix)) {
                Some(file) => plan.items.push(UploadItem {
                    key: format!("pxe/{}", file),
                    file: file.clone(),
                }),
                None => plan.missing.push(format!("no {} in output", what)),
            }
        }

        plan
    }
}

pub struct Uploader<'a> {
    transport: &'a dyn Transport,
    bucket: String,
    timestamp: String,
}

impl<'a> Uploader<'a> {
    pub fn new(transport: &'a dyn Transport, bucket: &str, timestamp: &str) -> Self {
        Self {
            transport,
            bucket: bucket.to_string(),
            timestamp: timestamp.to_string(),
        }
    }

    /// The `aws s3 cp` command run on the build host for one item.
    pub fn remote_cp_command(&self, item: &UploadItem) -> String {
        format!(
            "aws s3 cp {}/{} s3://{}/{} --metadata build-timestamp={}",
            REMOTE_OUTPUT_DIR, item.file, self.bucket, item.key, self.timestamp
        )
    }

    /// Execute the plan. Missing classes are warnings; present items
    /// that fail to copy are errors.
    pub async fn upload(&self, plan: &UploadPlan) -> Result<usize> {
        for note in &plan.missing {
            warn!(target: "upload", "{}", note);
        }
        for item in &plan.items {
            info!(target: "upload", key = %item.key, "uploading");
            exec_checked(self.transport, &self.remote_cp_command(item)).await?;
        }
        Ok(plan.items.len())
    }

    /// Copy each uploaded image to its `<name>-latest.<ext>` alias.
    /// Copies, never moves: the versioned object stays authoritative.
    pub async fn alias_latest(&self, plan: &UploadPlan) -> Result<()> {
        for item in plan.items.iter().filter(|i| i.key.starts_with("images/")) {
            let Some(ext) = item.file.rsplit('.').next() else {
                continue;
            };
            let alias = format!("images/{}-latest.{}", IMAGE_NAME, ext);
            info!(target: "upload", from = %item.key, to = %alias, "updating latest alias");
            exec_checked(
                self.transport,
                &format!(
                    "aws s3 cp s3://{bucket}/{key} s3://{bucket}/{alias}",
                    bucket = self.bucket,
                    key = item.key,
                    alias = alias
                ),
            )
            .await?;
        }
        Ok(())
    }
}

/// Upload the local build log with the caller's credentials. A missing
/// log is a warning, never an error.
pub async fn upload_build_log(
    log_path: &Path,
    bucket: &str,
    prefix: &str,
    timestamp: &str,
    profile: &str,
    region: &str,
) -> Result<bool> {
    if !log_path.exists() {
        warn!(target: "upload", path = %log_path.display(), "no build log to upload");
        return Ok(false);
    }

    let key = format!("{}/build-{}.log", prefix, timestamp);
    let src = log_path.display().to_string();
    let dest = format!("s3://{}/{}", bucket, key);
    let output = Command::new("aws")
        .args([
            "s3",
            "cp",
            src.as_str(),
            dest.as_str(),
            "--profile",
            profile,
            "--region",
            region,
        ])
        .output()
        .await
        .context("spawning aws s3 cp")?;

    if !output.status.success() {
        anyhow::bail!(
            "log upload failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    info!(target: "upload", key = %key, "build log uploaded");
    Ok(true)
}
