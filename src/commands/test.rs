use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

use crate::cli::TestArgs;
use crate::params::BuildParams;
use crate::paths;
use crate::retry::RetryPolicy;
use crate::validate::vm::{TestVm, VmSpec, DEFAULT_SSH_PORT};
use crate::validate::{run_checklist, ProbeReport, RunOutcome};

/// Boot wait: 60 attempts x 5s; enough for TCG-emulated first boot
const BOOT_RETRY: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(5));

pub async fn cmd_test(args: TestArgs) -> Result<()> {
    let params = BuildParams::resolve(&args.versions, args.bucket.clone());

    let image = match (&args.image, &args.s3_key) {
        (Some(path), _) => path.clone(),
        (None, Some(key)) => {
            let profile = args
                .profile
                .as_deref()
                .context("--s3-key requires --profile")?;
            let region = args
                .region
                .as_deref()
                .context("--s3-key requires --region")?;
            let bucket = params
                .bucket
                .as_deref()
                .context("--s3-key requires --bucket or IMAGE_BUCKET")?;
            let local = paths::staging_dir().join(
                Path::new(key)
                    .file_name()
                    .context("--s3-key has no file name component")?,
            );
            tokio::fs::create_dir_all(paths::staging_dir())
                .await
                .context("creating staging directory")?;
            fetch_from_s3(bucket, key, &local, profile, region).await?;
            local
        }
        (None, None) => bail!("provide --image or --s3-key"),
    };

    let report = boot_and_probe(&image, &params, args.cpu, args.mem).await?;
    match report.outcome() {
        RunOutcome::Fail => bail!("validation failed: {}", report.summary_line()),
        _ => Ok(()),
    }
}

/// Boot the throwaway VM, run the checklist, and tear the VM down on
/// every exit path. Also prints the report and writes the test log.
pub(crate) async fn boot_and_probe(
    image: &Path,
    params: &BuildParams,
    cpus: u8,
    mem_mib: u32,
) -> Result<ProbeReport> {
    let spec = VmSpec {
        image: image.to_path_buf(),
        cpus,
        mem_mib,
        ssh_port: DEFAULT_SSH_PORT,
    };

    println!("Boot-testing {}", image.display());

    // The guard owns the VM from here; drop covers aborts, the explicit
    // shutdown below covers both the success and probe-failure paths.
    let vm = TestVm::boot(&spec).await?;
    let probed = run_checklist(&vm.guest_transport(), params, BOOT_RETRY).await;
    let shutdown = vm.shutdown().await;
    let report = probed?;
    shutdown?;

    print!("{}", report.render());

    let log_path = paths::test_log(&params.timestamp);
    if let Some(parent) = log_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("creating log directory")?;
    }
    tokio::fs::write(&log_path, report.render())
        .await
        .context("writing test log")?;
    info!(target: "validate", log = %log_path.display(), "test log written");

    Ok(report)
}

/// Fetch an object with the caller's credentials.
pub(crate) async fn fetch_from_s3(
    bucket: &str,
    key: &str,
    local: &Path,
    profile: &str,
    region: &str,
) -> Result<()> {
    info!(target: "validate", key, "fetching image from object storage");
    let src = format!("s3://{}/{}", bucket, key);
    let dest = local.display().to_string();
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
        bail!(
            "fetching s3://{}/{} failed: {}",
            bucket,
            key,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
