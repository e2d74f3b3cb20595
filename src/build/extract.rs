//! Kernel and initrd extraction from the built image.
//!
//! The primary qcow2 is attached as a network block device, its root
//! partition mounted, and the two boot files copied out by glob. The
//! device MUST be released on every exit path — a leaked mount or nbd
//! attachment would poison the next build on the same host.

use anyhow::Result;

use crate::transport::{exec_checked, Transport};

const NBD_DEVICE: &str = "/dev/nbd0";
pub const MOUNT_POINT: &str = "/mnt/nodeforge-image";

/// Copy `vmlinuz-*` and `initrd.img-*` out of `image` into `dest_dir` on
/// the remote host.
pub async fn extract_boot_files(
    transport: &dyn Transport,
    image: &str,
    dest_dir: &str,
) -> Result<()> {
    exec_checked(transport, "sudo modprobe nbd max_part=8").await?;
    exec_checked(
        transport,
        &format!("sudo qemu-nbd --connect={} {}", NBD_DEVICE, image),
    )
    .await?;

    // From here on the device is attached: run the fallible part, then
    // release unconditionally before reporting either result.
    let copied = mount_and_copy(transport, dest_dir).await;
    let released = release(transport).await;
    copied?;
    released?;
    Ok(())
}

async fn mount_and_copy(transport: &dyn Transport, dest_dir: &str) -> Result<()> {
    exec_checked(
        transport,
        &format!(
            "sudo mkdir -p {mp} && sudo mount {dev}p1 {mp}",
            mp = MOUNT_POINT,
            dev = NBD_DEVICE
        ),
    )
    .await?;

    exec_checked(
        transport,
        &format!(
            "sudo sh -c 'cp {mp}/boot/vmlinuz-* {mp}/boot/initrd.img-* {dest}/'",
            mp = MOUNT_POINT,
            dest = dest_dir
        ),
    )
    .await?;

    exec_checked(
        transport,
        &format!(
            "sudo chmod a+r {dest}/vmlinuz-* {dest}/initrd.img-*",
            dest = dest_dir
        ),
    )
    .await?;

    Ok(())
}

/// Unmount and disconnect. Unmounting an already-unmounted path is fine;
/// a failed disconnect is not — the device would leak into the next run.
async fn release(transport: &dyn Transport) -> Result<()> {
    let _ = transport
        .exec(&format!("sudo umount {}", MOUNT_POINT))
        .await;
    exec_checked(
        transport,
        &format!("sudo qemu-nbd --disconnect {}", NBD_DEVICE),
    )
    .await?;
    Ok(())
}
