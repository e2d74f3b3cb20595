//! Typed rendering of the build-tool configuration and seed files.
//!
//! Everything the remote build consumes is rendered host-side from named
//! parameters — no shell interpolation anywhere near user-controlled
//! values.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::params::BuildParams;

const CREDENTIAL_LEN: usize = 24;

/// Per-run provisioning credential.
///
/// Generated fresh for every invocation, consumed only by the rendered
/// seed file, and never written anywhere that outlives the run's temp
/// directory.
pub struct Credential(String);

impl Credential {
    pub fn generate() -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CREDENTIAL_LEN)
            .map(char::from)
            .collect();
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep the secret out of debug output and logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// Packer variables file consumed by the image recipe.
pub fn render_packer_vars(params: &BuildParams) -> String {
    format!(
        r#"kubernetes_version  = "{k8s}"
containerd_version  = "{containerd}"
cni_plugins_version = "{cni}"
crictl_version      = "{crictl}"
image_name          = "{image}"
output_directory    = "output"
"#,
        k8s = params.k8s_version,
        containerd = params.containerd_version,
        cni = params.cni_version,
        crictl = params.crictl_version,
        image = params.artifact_basename(),
    )
}

/// cloud-init user-data seed for the build VM.
///
/// The provisioning account gets the per-run credential; the account is
/// discarded with the build VM, so the credential never needs rotation.
pub fn render_user_data(params: &BuildParams, credential: &Credential) -> String {
    format!(
        r#"#cloud-config
hostname: {host}
users:
  - name: packer
    groups: [sudo]
    shell: /bin/bash
    sudo: ALL=(ALL) NOPASSWD:ALL
    lock_passwd: false
ssh_pwauth: true
chpasswd:
  expire: false
  users:
    - name: packer
      password: {password}
      type: text
"#,
        host = params.artifact_basename(),
        password = credential.as_str(),
    )
}

/// cloud-init meta-data seed for the build VM.
pub fn render_meta_data(params: &BuildParams) -> String {
    format!(
        "instance-id: iid-{name}\nlocal-hostname: {name}\n",
        name = params.artifact_basename()
    )
}

/// Minimal OVF descriptor referencing the VMDK disk.
pub fn render_ovf_descriptor(name: &str, vmdk_file: &str, vmdk_size: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1"
          xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>
    <File ovf:href="{vmdk}" ovf:id="file1" ovf:size="{size}"/>
  </References>
  <DiskSection>
    <Info>Virtual disk</Info>
    <Disk ovf:diskId="vmdisk1" ovf:fileRef="file1"
          ovf:format="http://www.vmware.com/interfaces/specifications/vmdk.html#streamOptimized"/>
  </DiskSection>
  <VirtualSystem ovf:id="{name}">
    <Info>{name}</Info>
  </VirtualSystem>
</Envelope>
"#,
        vmdk = vmdk_file,
        size = vmdk_size,
        name = name,
    )
}

/// OVA manifest: one `SHA256(file)= digest` line per bundled file.
pub fn render_ova_manifest(entries: &[(String, String)]) -> String {
    let mut out = String::new();
    for (file, digest) in entries {
        out.push_str(&format!("SHA256({})= {}\n", file, digest));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::VersionOpts;

    fn params() -> BuildParams {
        BuildParams::resolve_with(&VersionOpts::default(), None, |_| None)
    }

    #[test]
    fn test_packer_vars_substitution() {
        let p = params();
        let vars = render_packer_vars(&p);
        assert!(vars.contains(&format!("kubernetes_version  = \"{}\"", p.k8s_version)));
        assert!(vars.contains(&p.artifact_basename()));
        assert!(!vars.contains("{"), "unsubstituted placeholder left behind");
    }

    #[test]
    fn test_credentials_are_fresh_per_run() {
        let a = Credential::generate();
        let b = Credential::generate();
        assert_eq!(a.as_str().len(), CREDENTIAL_LEN);
        assert_ne!(a.as_str(), b.as_str());
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let c = Credential::generate();
        let shown = format!("{:?}", c);
        assert!(!shown.contains(c.as_str()));
    }

    #[test]
    fn test_user_data_carries_credential_and_no_hash() {
        let p = params();
        let cred = Credential::generate();
        let seed = render_user_data(&p, &cred);
        assert!(seed.contains(cred.as_str()));
        assert!(seed.contains("type: text"));
        // the source pipeline embedded a fixed $6$ password hash; we never do
        assert!(!seed.contains("$6$"));
    }

    #[test]
    fn test_ova_manifest_format() {
        let manifest = render_ova_manifest(&[
            ("node.ovf".to_string(), "ab12".to_string()),
            ("node.vmdk".to_string(), "cd34".to_string()),
        ]);
        assert_eq!(manifest, "SHA256(node.ovf)= ab12\nSHA256(node.vmdk)= cd34\n");
    }

    #[test]
    fn test_meta_data_identifies_instance() {
        let p = params();
        let meta = render_meta_data(&p);
        assert!(meta.starts_with("instance-id: iid-"));
        assert!(meta.contains(&p.artifact_basename()));
    }
}
