//! Disposable QEMU guest for boot testing.
//!
//! `TestVm` is the guard for every per-run resource: overlay disk, seed
//! ISO, throwaway SSH keypair and the QEMU process itself, all living in
//! one temp directory. Construct the guard, probe the guest, then call
//! `shutdown`; the drop path covers aborts with a best-effort kill and
//! the temp directory cleans up the disks.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::transport::SshTransport;

pub const DEFAULT_SSH_PORT: u16 = 10022;

const GUEST_USER: &str = "ubuntu";

#[derive(Debug, Clone)]
pub struct VmSpec {
    pub image: PathBuf,
    pub cpus: u8,
    pub mem_mib: u32,
    pub ssh_port: u16,
}

pub fn qemu_binary(arch: &str) -> &'static str {
    match arch {
        "aarch64" => "qemu-system-aarch64",
        _ => "qemu-system-x86_64",
    }
}

/// QEMU invocation for a headless guest with user-mode networking and an
/// SSH host-forward. The image is never written: the guest boots an
/// overlay whose backing file is the artifact under test.
pub fn qemu_args(
    spec: &VmSpec,
    arch: &str,
    overlay: &Path,
    seed: &Path,
    kvm: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if arch == "aarch64" {
        args.extend(["-M".to_string(), "virt".to_string()]);
        args.extend([
            "-bios".to_string(),
            "/usr/share/AAVMF/AAVMF_CODE.fd".to_string(),
        ]);
    }

    if kvm {
        args.push("-enable-kvm".to_string());
        args.extend(["-cpu".to_string(), "host".to_string()]);
    } else {
        args.extend(["-cpu".to_string(), "max".to_string()]);
    }

    args.extend([
        "-m".to_string(),
        spec.mem_mib.to_string(),
        "-smp".to_string(),
        spec.cpus.to_string(),
        "-drive".to_string(),
        format!("file={},if=virtio,format=qcow2", overlay.display()),
        "-drive".to_string(),
        format!("file={},if=virtio,format=raw,readonly=on", seed.display()),
        "-netdev".to_string(),
        format!("user,id=net0,hostfwd=tcp:127.0.0.1:{}-:22", spec.ssh_port),
        "-device".to_string(),
        "virtio-net-pci,netdev=net0".to_string(),
        "-nographic".to_string(),
        "-no-reboot".to_string(),
    ]);

    args
}

pub struct TestVm {
    // owns the overlay, seed ISO and keypair; removed on drop
    work_dir: TempDir,
    process: Option<Child>,
    key_path: PathBuf,
    ssh_port: u16,
}

impl TestVm {
    /// Prepare the lease (overlay, seed, keypair) and boot the guest.
    pub async fn boot(spec: &VmSpec) -> Result<Self> {
        if !spec.image.exists() {
            bail!("image not found: {}", spec.image.display());
        }

        let arch = std::env::consts::ARCH;
        let binary = qemu_binary(arch);

        // Capability check: qemu present, KVM acceleration optional
        let have_qemu = Command::new(binary)
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !have_qemu {
            bail!("{} not found; install qemu-system to run boot tests", binary);
        }
        let kvm = Path::new("/dev/kvm").exists();
        if !kvm {
            warn!(target: "validate", "no /dev/kvm; booting with TCG emulation (slow)");
        }

        let work_dir = tempfile::tempdir().context("creating VM work directory")?;

        let key_path = generate_keypair(work_dir.path()).await?;
        let pubkey = tokio::fs::read_to_string(key_path.with_extension("pub"))
            .await
            .context("reading generated public key")?;

        let seed = build_seed_iso(work_dir.path(), pubkey.trim()).await?;
        let overlay = create_overlay(work_dir.path(), &spec.image).await?;

        let args = qemu_args(spec, arch, &overlay, &seed, kvm);
        info!(target: "validate", binary, port = spec.ssh_port, "booting throwaway VM");

        let console_log = std::fs::File::create(work_dir.path().join("console.log"))
            .context("creating console log")?;
        let child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(console_log.try_clone().context("cloning log handle")?))
            .stderr(Stdio::from(console_log))
            .spawn()
            .context("spawning qemu")?;

        Ok(Self {
            work_dir,
            process: Some(child),
            key_path,
            ssh_port: spec.ssh_port,
        })
    }

    /// SSH transport to the guest through the host-forwarded port.
    pub fn guest_transport(&self) -> SshTransport {
        SshTransport::new(GUEST_USER, "127.0.0.1", &self.key_path).with_port(self.ssh_port)
    }

    pub fn console_log(&self) -> PathBuf {
        self.work_dir.path().join("console.log")
    }

    /// Tear the guest down. Also runs best-effort from drop, so callers
    /// may bail out between boot and shutdown without leaking the VM.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        info!(target: "validate", "throwaway VM destroyed");
        Ok(())
    }
}

impl Drop for TestVm {
    fn drop(&mut self) {
        if let Some(child) = &mut self.process {
            let _ = child.start_kill();
        }
    }
}

async fn generate_keypair(dir: &Path) -> Result<PathBuf> {
    let key_path = dir.join("id_ed25519");
    let key_arg = key_path.display().to_string();
    let output = Command::new("ssh-keygen")
        .args(["-t", "ed25519", "-N", "", "-q", "-f", key_arg.as_str()])
        .output()
        .await
        .context("spawning ssh-keygen")?;
    if !output.status.success() {
        bail!(
            "ssh-keygen failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(key_path)
}

async fn build_seed_iso(dir: &Path, pubkey: &str) -> Result<PathBuf> {
    let user_data = format!(
        r#"#cloud-config
users:
  - name: {user}
    groups: [sudo]
    sudo: ALL=(ALL) NOPASSWD:ALL
    shell: /bin/bash
    ssh_authorized_keys:
      - {pubkey}
"#,
        user = GUEST_USER,
        pubkey = pubkey,
    );
    let meta_data = "instance-id: iid-nodeforge-test\nlocal-hostname: nodeforge-test\n";

    let user_path = dir.join("user-data");
    let meta_path = dir.join("meta-data");
    let seed_path = dir.join("seed.iso");
    tokio::fs::write(&user_path, user_data)
        .await
        .context("writing test user-data")?;
    tokio::fs::write(&meta_path, meta_data)
        .await
        .context("writing test meta-data")?;

    let output = Command::new("cloud-localds")
        .args([
            &seed_path.display().to_string(),
            &user_path.display().to_string(),
            &meta_path.display().to_string(),
        ])
        .output()
        .await
        .context("spawning cloud-localds")?;
    if !output.status.success() {
        bail!(
            "cloud-localds failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(seed_path)
}

async fn create_overlay(dir: &Path, image: &Path) -> Result<PathBuf> {
    let overlay = dir.join("overlay.qcow2");
    let backing = image.display().to_string();
    let overlay_arg = overlay.display().to_string();
    let output = Command::new("qemu-img")
        .args([
            "create",
            "-f",
            "qcow2",
            "-b",
            backing.as_str(),
            "-F",
            "qcow2",
            overlay_arg.as_str(),
        ])
        .output()
        .await
        .context("spawning qemu-img create")?;
    if !output.status.success() {
        bail!(
            "overlay creation failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(overlay)
}
