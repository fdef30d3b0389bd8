//! Formatting, mounting and fstab generation for the planned partitions.

use super::planner::PartitionPlan;
use crate::command::CommandSpec;
use crate::context::InstallContext;
use crate::error::{InstallError, Result};

/// ext4 on root, always. FAT32 on the ESP only when it was just created.
pub fn format_partitions(ctx: &InstallContext<'_>, plan: &PartitionPlan) -> Result<()> {
    ctx.log(&format!("Formatting root {} as ext4", plan.root_partition));
    ctx.run(&CommandSpec::new("mkfs.ext4", ["-F", plan.root_partition.as_str()]))?;

    if plan.formats_efi() {
        ctx.log(&format!("Formatting EFI {} as FAT32", plan.efi_partition));
        ctx.run(&CommandSpec::new("mkfs.fat", ["-F32", plan.efi_partition.as_str()]))?;
    } else {
        ctx.log(&format!(
            "Reusing existing EFI partition {} (not reformatting)",
            plan.efi_partition
        ));
    }
    Ok(())
}

/// Root at the mount root, then the ESP at `<root>/boot/efi`.
pub fn mount_target(ctx: &InstallContext<'_>, plan: &PartitionPlan) -> Result<()> {
    let root = &ctx.settings.mount_root;
    let efi = ctx.settings.efi_mount();
    let root_str = root.display().to_string();
    let efi_str = efi.display().to_string();

    ctx.create_dir_all(root)?;
    ctx.run(&CommandSpec::new("mount", [plan.root_partition.as_str(), root_str.as_str()]))?;
    ctx.create_dir_all(&efi)?;
    ctx.run(&CommandSpec::new("mount", [plan.efi_partition.as_str(), efi_str.as_str()]))?;
    Ok(())
}

/// `genfstab -U` into `<root>/etc/fstab`. Empty output means nothing is
/// mounted where it should be, and the system would not boot.
pub fn generate_fstab(ctx: &InstallContext<'_>) -> Result<()> {
    let root = ctx.settings.mount_root.display().to_string();
    let spec = CommandSpec::probe("genfstab", ["-U", root.as_str()]);
    if ctx.dry_run {
        ctx.log(&format!("[DRY RUN] Skipped: {}", spec));
        return Ok(());
    }

    let fstab = ctx.output(&spec)?;
    if fstab.trim().is_empty() {
        return Err(InstallError::EmptyFstab);
    }

    let etc = ctx.target_path("etc");
    ctx.create_dir_all(&etc)?;
    ctx.write_file(&etc.join("fstab"), &fstab)?;
    ctx.log("fstab written");
    Ok(())
}

/// Flush and unmount the target tree. Failures only warn.
pub fn unmount_target(ctx: &InstallContext<'_>) {
    let root = ctx.settings.mount_root.display().to_string();
    ctx.run_best_effort(&CommandSpec::new("sync", Vec::<String>::new()), "sync");
    ctx.run_best_effort(&CommandSpec::new("umount", ["-R", root.as_str()]), "Unmounting target");
}
