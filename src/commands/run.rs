//! Top-level pipeline driver.
//!
//! One invocation is a strictly linear sequence behind independent skip
//! switches: provision (or re-read outputs) -> build -> upload ->
//! validate -> optional teardown. Stages never overlap; the first
//! failure aborts the remaining main stages. Teardown still runs after a
//! failed build or validation, but never when provisioning itself
//! failed.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::build::RemoteBuild;
use crate::cli::RunArgs;
use crate::infra::{InfraOutputs, Teardown, TerraformCli};
use crate::params::{BuildParams, IMAGE_NAME};
use crate::paths;
use crate::transport::{SshTransport, Transport};
use crate::upload::{upload_build_log, UploadPlan, Uploader};
use crate::validate::RunOutcome;

use super::test::boot_and_probe;

/// User account on the provisioned hosts.
pub const REMOTE_USER: &str = "ubuntu";

/// Stages of one pipeline invocation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Provision,
    ResolveOutputs,
    Build,
    Upload,
    Validate,
    CleanupAll,
    CleanupCompute,
}

impl Stage {
    fn is_cleanup(self) -> bool {
        matches!(self, Stage::CleanupAll | Stage::CleanupCompute)
    }
}

/// Derive the stage plan from the skip switches.
pub fn plan_stages(args: &RunArgs) -> Vec<Stage> {
    let mut stages = Vec::new();
    if args.skip_infra {
        stages.push(Stage::ResolveOutputs);
    } else {
        stages.push(Stage::Provision);
    }
    if !args.skip_build {
        stages.push(Stage::Build);
        stages.push(Stage::Upload);
    }
    if !args.skip_test {
        stages.push(Stage::Validate);
    }
    match args.teardown() {
        Some(Teardown::All) => stages.push(Stage::CleanupAll),
        Some(Teardown::ComputeOnly) => stages.push(Stage::CleanupCompute),
        None => {}
    }
    stages
}

/// Split a plan into (main, cleanup). Cleanup stages run after the main
/// sequence whatever its outcome — provisioning failures excepted, which
/// abort before the split is ever consulted.
pub fn split_plan(stages: &[Stage]) -> (Vec<Stage>, Vec<Stage>) {
    let (cleanup, main): (Vec<Stage>, Vec<Stage>) =
        stages.iter().partition(|s| s.is_cleanup());
    (main, cleanup)
}

pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let params = BuildParams::resolve(&args.versions, args.bucket.clone());
    let tf = TerraformCli::new(&args.infra_dir, &args.aws.profile, &args.aws.region);

    let (main_stages, cleanup_stages) = split_plan(&plan_stages(&args));

    // Provisioning (or output resolution) comes first; its failure also
    // cancels cleanup, everything else still gets torn down.
    let outputs = match main_stages.first() {
        Some(Stage::ResolveOutputs) => tf
            .outputs()
            .await
            .context("--skip-infra requires prior provisioner outputs")?,
        _ => {
            tf.apply(args.hosts()).await?;
            tf.outputs().await?
        }
    };
    outputs.write_private_key(&paths::key_file()).await?;

    let main_result = run_main_sequence(&args, &params, &outputs, &main_stages[1..]).await;
    if let Err(e) = &main_result {
        warn!(target: "run", error = %e, "main sequence failed");
    }

    let mut cleanup_result = Ok(());
    for stage in cleanup_stages {
        let mode = match stage {
            Stage::CleanupAll => Teardown::All,
            Stage::CleanupCompute => Teardown::ComputeOnly,
            _ => continue,
        };
        if let Err(e) = tf.destroy(mode).await {
            cleanup_result = Err(e.context("teardown failed"));
        }
    }

    main_result.and(cleanup_result).map(|()| {
        println!("Pipeline complete ({})", params.artifact_basename());
    })
}

async fn run_main_sequence(
    args: &RunArgs,
    params: &BuildParams,
    outputs: &InfraOutputs,
    stages: &[Stage],
) -> Result<()> {
    for stage in stages {
        match stage {
            Stage::Build => {
                info!(target: "run", "stage: build");
                let transport = host_transport(outputs)?;
                transport.wait_reachable().await?;
                RemoteBuild::new(&transport, params)
                    .run(&paths::build_log(&params.timestamp))
                    .await?;
            }
            Stage::Upload => {
                info!(target: "run", "stage: upload");
                let bucket = params
                    .bucket
                    .clone()
                    .map(Ok)
                    .unwrap_or_else(|| outputs.require_bucket().map(str::to_string))?;
                let transport = host_transport(outputs)?;
                let files = RemoteBuild::new(&transport, params).list_outputs().await?;
                let plan = UploadPlan::build(&files);
                let uploader = Uploader::new(&transport, &bucket, &params.timestamp);
                let count = uploader.upload(&plan).await?;
                uploader.alias_latest(&plan).await?;
                println!(
                    "Uploaded {} artifacts to s3://{} ({} missing)",
                    count,
                    bucket,
                    plan.missing.len()
                );
                // The log is optional; failing its upload must not fail the run
                if let Err(e) = upload_build_log(
                    &paths::build_log(&params.timestamp),
                    &bucket,
                    &params.log_prefix,
                    &params.timestamp,
                    &args.aws.profile,
                    &args.aws.region,
                )
                .await
                {
                    warn!(target: "run", error = %e, "build log upload failed");
                }
            }
            Stage::Validate => {
                info!(target: "run", "stage: validate");
                let image = resolve_test_image(args, params, outputs).await?;
                let report = boot_and_probe(&image, params, 2, 2048).await?;
                if report.outcome() == RunOutcome::Fail {
                    anyhow::bail!("validation failed: {}", report.summary_line());
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn host_transport(outputs: &InfraOutputs) -> Result<SshTransport> {
    let host = outputs.require_test_host()?;
    Ok(SshTransport::new(REMOTE_USER, host, &paths::key_file()))
}

/// Where the image under test comes from: an explicit `--image` path, the
/// freshly built primary on the remote host, or the latest alias in the
/// bucket when the build was skipped.
async fn resolve_test_image(
    args: &RunArgs,
    params: &BuildParams,
    outputs: &InfraOutputs,
) -> Result<PathBuf> {
    if let Some(image) = &args.image {
        return Ok(image.clone());
    }

    let staging = paths::staging_dir();
    tokio::fs::create_dir_all(&staging)
        .await
        .context("creating staging directory")?;

    if !args.skip_build {
        let transport = host_transport(outputs)?;
        let build = RemoteBuild::new(&transport, params);
        let local = staging.join(params.image_file("qcow2"));
        info!(target: "run", image = %local.display(), "fetching built image for validation");
        transport.copy_from(&build.primary_image(), &local).await?;
        return Ok(local);
    }

    let bucket = params
        .bucket
        .clone()
        .map(Ok)
        .unwrap_or_else(|| outputs.require_bucket().map(str::to_string))?;
    let key = format!("images/{}-latest.qcow2", IMAGE_NAME);
    let local = staging.join(format!("{}-latest.qcow2", IMAGE_NAME));
    super::test::fetch_from_s3(
        &bucket,
        &key,
        &local,
        &args.aws.profile,
        &args.aws.region,
    )
    .await?;
    Ok(local)
}
