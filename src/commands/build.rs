use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::build::{RemoteBuild, REMOTE_OUTPUT_DIR};
use crate::cli::BuildArgs;
use crate::infra::read_outputs;
use crate::params::BuildParams;
use crate::paths;
use crate::transport::SshTransport;

use super::run::REMOTE_USER;

pub async fn cmd_build(args: BuildArgs) -> Result<()> {
    let params = BuildParams::resolve(&args.versions, None);
    let host = resolve_host(args.host, &args.infra_dir).await?;
    let key = resolve_key(args.key);

    let transport = SshTransport::new(REMOTE_USER, &host, &key);
    transport.wait_reachable().await?;

    let log = paths::build_log(&params.timestamp);
    RemoteBuild::new(&transport, &params).run(&log).await?;

    println!(
        "Build complete: {} on {} (log: {})",
        REMOTE_OUTPUT_DIR,
        host,
        log.display()
    );
    Ok(())
}

/// `--host` wins; otherwise fall back to the provisioned test host.
pub(crate) async fn resolve_host(host: Option<String>, infra_dir: &Path) -> Result<String> {
    match host {
        Some(host) => Ok(host),
        None => {
            let outputs = read_outputs(infra_dir)
                .await
                .context("no --host given and no provisioner outputs found")?;
            Ok(outputs.require_test_host()?.to_string())
        }
    }
}

pub(crate) fn resolve_key(key: Option<PathBuf>) -> PathBuf {
    key.unwrap_or_else(paths::key_file)
}
