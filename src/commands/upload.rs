use anyhow::{Context, Result};

use crate::build::RemoteBuild;
use crate::cli::{UploadArgs, VersionOpts};
use crate::infra::read_outputs;
use crate::params::BuildParams;
use crate::transport::SshTransport;
use crate::upload::{UploadPlan, Uploader};

use super::build::{resolve_host, resolve_key};
use super::run::REMOTE_USER;

pub async fn cmd_upload(args: UploadArgs) -> Result<()> {
    let params = BuildParams::resolve(&VersionOpts::default(), args.bucket.clone());

    let host = resolve_host(args.host, &args.infra_dir).await?;
    let bucket = match params.bucket.clone() {
        Some(bucket) => bucket,
        None => read_outputs(&args.infra_dir)
            .await
            .context("no --bucket given and no provisioner outputs found")?
            .require_bucket()?
            .to_string(),
    };

    let transport = SshTransport::new(REMOTE_USER, &host, &resolve_key(args.key));
    transport.wait_reachable().await?;

    let files = RemoteBuild::new(&transport, &params).list_outputs().await?;
    let plan = UploadPlan::build(&files);

    let uploader = Uploader::new(&transport, &bucket, &params.timestamp);
    let count = uploader.upload(&plan).await?;
    if args.latest {
        uploader.alias_latest(&plan).await?;
    }

    println!(
        "Uploaded {} artifacts to s3://{} ({} missing)",
        count,
        bucket,
        plan.missing.len()
    );
    Ok(())
}
