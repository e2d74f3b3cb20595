//! Build parameter resolution.
//!
//! One immutable struct carries every knob the pipeline needs, resolved
//! once at startup: CLI flag wins over environment variable wins over
//! built-in default. Stages receive it by reference and never mutate it.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::VersionOpts;

pub const DEFAULT_K8S_VERSION: &str = "1.29.3";
pub const DEFAULT_CONTAINERD_VERSION: &str = "1.7.13";
pub const DEFAULT_CNI_VERSION: &str = "1.4.0";
pub const DEFAULT_CRICTL_VERSION: &str = "1.29.0";

/// Base name for every produced artifact.
pub const IMAGE_NAME: &str = "k8s-node";

/// Default S3 key prefix for per-run build logs.
const DEFAULT_LOG_PREFIX: &str = "logs";

/// Image recipe repository cloned onto the build host.
const DEFAULT_RECIPE_REPO: &str = "https://github.com/kubernetes-sigs/image-builder.git";

#[derive(Debug, Clone, Serialize)]
pub struct BuildParams {
    pub k8s_version: String,
    pub containerd_version: String,
    pub cni_version: String,
    pub crictl_version: String,

    /// S3 bucket override; when unset the provisioned bucket output is used.
    pub bucket: Option<String>,
    /// S3 key prefix for build logs.
    pub log_prefix: String,
    /// Image recipe repository cloned on the build host.
    pub recipe_repo: String,
    /// AWS shared credentials file override.
    pub credentials_file: Option<PathBuf>,

    /// Build timestamp, fixed at resolution time so every artifact of one
    /// run shares the same name.
    pub timestamp: String,
}

impl BuildParams {
    /// Resolve parameters from CLI overrides and the process environment.
    pub fn resolve(versions: &VersionOpts, bucket: Option<String>) -> Self {
        Self::resolve_with(versions, bucket, |key| std::env::var(key).ok())
    }

    /// Resolution with an injectable environment lookup.
    pub fn resolve_with<F>(versions: &VersionOpts, bucket: Option<String>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |flag: &Option<String>, var: &str, default: &str| {
            flag.clone()
                .or_else(|| env(var))
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            k8s_version: pick(&versions.k8s_version, "K8S_VERSION", DEFAULT_K8S_VERSION),
            containerd_version: pick(
                &versions.containerd_version,
                "CONTAINERD_VERSION",
                DEFAULT_CONTAINERD_VERSION,
            ),
            cni_version: pick(&versions.cni_version, "CNI_VERSION", DEFAULT_CNI_VERSION),
            crictl_version: pick(
                &versions.crictl_version,
                "CRICTL_VERSION",
                DEFAULT_CRICTL_VERSION,
            ),
            bucket: bucket.or_else(|| env("IMAGE_BUCKET")),
            log_prefix: env("IMAGE_PREFIX").unwrap_or_else(|| DEFAULT_LOG_PREFIX.to_string()),
            recipe_repo: env("IMAGE_RECIPE_REPO")
                .unwrap_or_else(|| DEFAULT_RECIPE_REPO.to_string()),
            credentials_file: env("AWS_SHARED_CREDENTIALS_FILE").map(PathBuf::from),
            timestamp: Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
        }
    }

    /// `<name>-<k8s_version>-<timestamp>`, the stem every artifact shares.
    pub fn artifact_basename(&self) -> String {
        format!("{}-{}-{}", IMAGE_NAME, self.k8s_version, self.timestamp)
    }

    pub fn image_file(&self, ext: &str) -> String {
        format!("{}.{}", self.artifact_basename(), ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let p = BuildParams::resolve_with(&VersionOpts::default(), None, |_| None);
        assert_eq!(p.k8s_version, DEFAULT_K8S_VERSION);
        assert_eq!(p.containerd_version, DEFAULT_CONTAINERD_VERSION);
        assert_eq!(p.log_prefix, "logs");
        assert!(p.bucket.is_none());
    }

    #[test]
    fn test_env_overrides_default() {
        let env = env_of(&[("K8S_VERSION", "1.30.0"), ("IMAGE_BUCKET", "my-bucket")]);
        let p = BuildParams::resolve_with(&VersionOpts::default(), None, env);
        assert_eq!(p.k8s_version, "1.30.0");
        assert_eq!(p.bucket.as_deref(), Some("my-bucket"));
    }

    #[test]
    fn test_flag_overrides_env() {
        let versions = VersionOpts {
            k8s_version: Some("1.31.1".to_string()),
            ..Default::default()
        };
        let env = env_of(&[("K8S_VERSION", "1.30.0")]);
        let p = BuildParams::resolve_with(&versions, None, env);
        assert_eq!(p.k8s_version, "1.31.1");
    }

    #[test]
    fn test_artifact_naming_embeds_version_and_timestamp() {
        let p = BuildParams::resolve_with(&VersionOpts::default(), None, |_| None);
        let name = p.image_file("qcow2");
        assert!(name.starts_with(&format!("{}-{}-", IMAGE_NAME, p.k8s_version)));
        assert!(name.ends_with(".qcow2"));
        assert!(name.contains(&p.timestamp));
    }
}
