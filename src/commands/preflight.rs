use anyhow::Result;
use tokio::process::Command;

use crate::paths;
use crate::validate::vm::qemu_binary;

pub async fn cmd_preflight() -> Result<()> {
    println!("🔍 Checking nodeforge requirements...\n");

    let mut all_ok = true;

    // Local drivers of the pipeline
    all_ok &= check_command("terraform", "version", "Terraform").await;
    all_ok &= check_command("aws", "--version", "AWS CLI").await;
    all_ok &= check_command("ssh", "-V", "OpenSSH client").await;

    // Boot-test tooling
    all_ok &= check_command("qemu-img", "--version", "qemu-img").await;
    all_ok &= check_command(
        qemu_binary(std::env::consts::ARCH),
        "--version",
        "QEMU system emulator",
    )
    .await;
    all_ok &= check_command("cloud-localds", "--help", "cloud-localds").await;

    all_ok &= check_kvm().await;
    all_ok &= check_key_file().await;

    println!();
    if all_ok {
        println!("✅ All checks passed! You're ready to run the pipeline.");
    } else {
        println!("⚠️  Some checks failed. Typical fixes:");
        println!("  nodeforge infra up --profile <p> --region <r>   # provision + write ssh key");
        println!("  apt install qemu-system qemu-utils cloud-image-utils");
    }

    Ok(())
}

async fn check_command(cmd: &str, arg: &str, name: &str) -> bool {
    print!("  {} ... ", name);

    match Command::new(cmd).arg(arg).output().await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version_line = stdout.lines().next().unwrap_or("installed");
            println!("✓ {}", version_line.trim());
            true
        }
        _ => {
            println!("✗ not found");
            false
        }
    }
}

async fn check_kvm() -> bool {
    print!("  KVM acceleration ... ");

    if tokio::fs::metadata("/dev/kvm").await.is_ok() {
        println!("✓ available");
        true
    } else {
        // boot tests still run under TCG, just slowly
        println!("⚠ /dev/kvm not found (boot tests will be slow)");
        true
    }
}

async fn check_key_file() -> bool {
    print!("  SSH key ... ");

    let path = paths::key_file();
    if tokio::fs::metadata(&path).await.is_ok() {
        println!("✓ {}", path.display());
        true
    } else {
        println!("✗ not found (run: nodeforge infra up)");
        false
    }
}
