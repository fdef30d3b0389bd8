//! Partition planning engine
//!
//! Turns an install mode plus a probed [`Disk`] into a concrete layout, then
//! applies it. Planning is split in two so every structural precondition is
//! checked before the first destructive command runs:
//!
//! 1. [`Layout::plan`] validates the request (EFI present, Windows present,
//!    shrink floor, free region large enough) and computes the geometry. It
//!    only ever runs read-only probes.
//! 2. [`Layout::apply`] issues the partitioning commands and returns the
//!    resulting [`PartitionPlan`].
//!
//! # Strategies
//!
//! | Mode      | Commands |
//! |-----------|----------|
//! | wipe      | wipefs → sgdisk --zap-all → sgdisk (512 MiB ESP + root) |
//! | freespace | parted mkpart in the first free region that fits |
//! | dualboot  | ntfsresize → parted resizepart → parted mkpart |
//!
//! Every partition table change is followed by `partprobe` and a settle delay
//! before anything probes the disk again.
//!
//! All sizes handed to the tools are whole MiB.

use crate::command::CommandSpec;
use crate::config::InstallConfig;
use crate::context::InstallContext;
use crate::disk::{Disk, Partition, device_path, partition_path};
use crate::error::{InstallError, Result};
use crate::parsers::{lsblk, parted};
use crate::types::InstallMode;
use crate::units::{self, GIB, MIB};
use std::fmt;
use tracing::debug;

/// Size of the ESP created by the wipe strategy.
pub const EFI_PARTITION_MIB: u64 = 512;

/// Smallest root partition the wipe strategy will create.
pub const MIN_ROOT_BYTES: u64 = 8 * GIB;

/// Windows is never shrunk below this.
pub const WINDOWS_FLOOR_BYTES: u64 = 20 * GIB;

/// Resulting partitions of a planning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub efi_partition: String,
    pub root_partition: String,
    pub strategy: InstallMode,
    pub target_size_bytes: u64,
}

impl PartitionPlan {
    /// Only a freshly created ESP is formatted; reused ones hold other systems' loaders.
    pub fn formats_efi(&self) -> bool {
        self.strategy.creates_efi()
    }
}

/// Disk and partitions a plan is computed from.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'d> {
    pub disk: &'d Disk,
    pub mode: InstallMode,
    pub target_size_bytes: u64,
    pub efi: Option<&'d Partition>,
    pub windows: Option<&'d Partition>,
}

impl<'d> PlanRequest<'d> {
    /// Use the partitions named in the config, or classify the probed disk.
    pub fn from_config(config: &InstallConfig, disk: &'d Disk) -> Result<Self> {
        let classified = disk.classify();

        let efi = match &config.efi_partition {
            Some(name) => Some(disk.partition(name).ok_or_else(|| InstallError::NoEfiPartition {
                disk: disk.path(),
                mode: config.mode,
            })?),
            None => classified.efi,
        };
        let windows = match &config.windows_partition {
            Some(name) => Some(
                disk.partition(name)
                    .ok_or_else(|| InstallError::NoWindowsPartition { disk: disk.path() })?,
            ),
            None => classified.windows,
        };

        Ok(Self {
            disk,
            mode: config.mode,
            target_size_bytes: config.target_size_bytes(),
            efi,
            windows,
        })
    }
}

/// A validated, not yet applied partition layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Wipe(WipeLayout),
    Freespace(FreespaceLayout),
    Dualboot(DualbootLayout),
}

impl Layout {
    /// Validate the request and compute geometry. Runs no destructive command.
    pub fn plan(ctx: &InstallContext<'_>, request: &PlanRequest<'_>) -> Result<Self> {
        let disk = request.disk;
        match request.mode {
            InstallMode::Wipe => Ok(Self::Wipe(WipeLayout::for_disk(disk)?)),
            InstallMode::Freespace => {
                let efi = require_efi(request)?;
                let needed = require_size(request)?;
                let table = read_table(ctx, disk)?;
                Ok(Self::Freespace(FreespaceLayout::new(disk, efi, &table, needed)?))
            }
            InstallMode::Dualboot => {
                let efi = require_efi(request)?;
                let windows = request
                    .windows
                    .ok_or_else(|| InstallError::NoWindowsPartition { disk: disk.path() })?;
                let needed = require_size(request)?;
                let table = read_table(ctx, disk)?;
                Ok(Self::Dualboot(DualbootLayout::new(disk, efi, windows, &table, needed)?))
            }
        }
    }

    /// What the disk will look like. The root path is a prediction for
    /// freespace and dualboot until the layout is applied.
    pub fn preview(&self) -> PartitionPlan {
        match self {
            Self::Wipe(l) => l.plan(),
            Self::Freespace(l) => PartitionPlan {
                efi_partition: l.efi_partition.clone(),
                root_partition: l.predicted_root.clone(),
                strategy: InstallMode::Freespace,
                target_size_bytes: l.target_size_bytes,
            },
            Self::Dualboot(l) => PartitionPlan {
                efi_partition: l.efi_partition.clone(),
                root_partition: l.predicted_root.clone(),
                strategy: InstallMode::Dualboot,
                target_size_bytes: l.target_size_bytes,
            },
        }
    }

    /// Destructive commands in the order they will run.
    pub fn commands(&self) -> Vec<CommandSpec> {
        match self {
            Self::Wipe(l) => l.commands().to_vec(),
            Self::Freespace(l) => vec![l.mkpart_command()],
            Self::Dualboot(l) => vec![l.shrink_command(), l.resize_command(), l.mkpart_command()],
        }
    }

    /// Run the partitioning commands.
    pub fn apply(&self, ctx: &InstallContext<'_>) -> Result<PartitionPlan> {
        match self {
            Self::Wipe(l) => l.apply(ctx),
            Self::Freespace(l) => l.apply(ctx),
            Self::Dualboot(l) => {
                let shrunk = l.shrink_filesystem(ctx)?;
                let resized = shrunk.resize_partition_entry(ctx)?;
                resized.create_root_partition(ctx)
            }
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wipe(l) => write!(
                f,
                "Wipe {}: new GPT, {} MiB EFI + {} root",
                l.disk,
                EFI_PARTITION_MIB,
                units::human_bytes(l.root_bytes)
            ),
            Self::Freespace(l) => write!(
                f,
                "Free space on {}: root {}MiB-{}MiB, reuse EFI {}",
                l.disk, l.start_mib, l.end_mib, l.efi_partition
            ),
            Self::Dualboot(l) => write!(
                f,
                "Dual boot on {}: shrink {} to {}, root {}MiB-{}MiB, reuse EFI {}",
                l.disk,
                l.windows,
                units::human_bytes(l.shrink_to_bytes),
                l.root_start_mib,
                l.root_end_mib,
                l.efi_partition
            ),
        }
    }
}

fn require_efi<'d>(request: &PlanRequest<'d>) -> Result<&'d Partition> {
    request.efi.ok_or_else(|| InstallError::NoEfiPartition {
        disk: request.disk.path(),
        mode: request.mode,
    })
}

fn require_size(request: &PlanRequest<'_>) -> Result<u64> {
    if request.target_size_bytes == 0 {
        return Err(InstallError::config(format!(
            "{} mode needs a target size for Arch",
            request.mode
        )));
    }
    Ok(request.target_size_bytes)
}

fn read_table(ctx: &InstallContext<'_>, disk: &Disk) -> Result<parted::PartedTable> {
    let spec = CommandSpec::probe("parted", ["-s", &disk.path(), "unit", "MiB", "print", "free"]);
    let output = ctx.output(&spec)?;
    Ok(parted::parse_print_free(&output)?)
}

/// Partition number following the highest existing one.
fn next_partition_number(disk: &Disk, table: &parted::PartedTable) -> u32 {
    let from_table = table.partitions.iter().map(|p| p.number).max();
    let from_probe = disk.partitions.iter().filter_map(Partition::number).max();
    from_table.max(from_probe).unwrap_or(0) + 1
}

/// Force a partition table reread, then let udev catch up.
fn reread_partitions(ctx: &InstallContext<'_>, disk: &str) -> Result<()> {
    ctx.run(&CommandSpec::new("partprobe", [disk]))?;
    ctx.settle();
    Ok(())
}

fn child_names(ctx: &InstallContext<'_>, disk_path: &str) -> Result<Vec<String>> {
    let name = disk_path.strip_prefix("/dev/").unwrap_or(disk_path);
    let output = ctx.output(&CommandSpec::probe("lsblk", ["-ln", "-o", "NAME", disk_path]))?;
    Ok(lsblk::parse_name_list(&output, name))
}

/// Identify the partition `create` added by diffing the child list.
fn create_and_find_new(
    ctx: &InstallContext<'_>,
    disk_path: &str,
    predicted: &str,
    create: &CommandSpec,
) -> Result<String> {
    let before = child_names(ctx, disk_path)?;
    ctx.run(create)?;
    reread_partitions(ctx, disk_path)?;

    if ctx.dry_run {
        return Ok(predicted.to_string());
    }

    let after = child_names(ctx, disk_path)?;
    let added: Vec<&String> = after.iter().filter(|n| !before.contains(n)).collect();
    match added.as_slice() {
        [only] => Ok(device_path(only)),
        _ => {
            let last = after.last().ok_or_else(|| InstallError::RootPartitionNotFound {
                disk: disk_path.to_string(),
            })?;
            ctx.warn(&format!(
                "Expected one new partition on {}, found {}; assuming last device {}",
                disk_path,
                added.len(),
                last
            ));
            Ok(device_path(last))
        }
    }
}

// ============================================================================
// wipe
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeLayout {
    pub disk: String,
    pub root_bytes: u64,
    commands: [CommandSpec; 3],
}

impl WipeLayout {
    pub fn for_disk(disk: &Disk) -> Result<Self> {
        let required = EFI_PARTITION_MIB * MIB + MIN_ROOT_BYTES;
        if disk.size <= required {
            return Err(InstallError::DiskTooSmall {
                disk: disk.path(),
                size_bytes: disk.size,
                required_bytes: required,
            });
        }

        let path = disk.path();
        let efi_size = format!("1:0:+{}M", EFI_PARTITION_MIB);
        let commands = [
            CommandSpec::new("wipefs", ["-a", path.as_str()]),
            CommandSpec::new("sgdisk", ["--zap-all", path.as_str()]),
            CommandSpec::new(
                "sgdisk",
                [
                    "-n", efi_size.as_str(), "-t", "1:ef00", "-c", "1:EFI",
                    "-n", "2:0:0", "-t", "2:8300", "-c", "2:root",
                    path.as_str(),
                ],
            ),
        ];

        Ok(Self {
            root_bytes: disk.size - EFI_PARTITION_MIB * MIB,
            disk: path,
            commands,
        })
    }

    pub fn efi_size_bytes(&self) -> u64 {
        EFI_PARTITION_MIB * MIB
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    fn plan(&self) -> PartitionPlan {
        PartitionPlan {
            efi_partition: partition_path(&self.disk, 1),
            root_partition: partition_path(&self.disk, 2),
            strategy: InstallMode::Wipe,
            target_size_bytes: self.root_bytes,
        }
    }

    fn apply(&self, ctx: &InstallContext<'_>) -> Result<PartitionPlan> {
        ctx.log(&format!("Wiping {} and creating new GPT layout", self.disk));
        for spec in &self.commands {
            ctx.run(spec)?;
        }
        reread_partitions(ctx, &self.disk)?;

        let plan = self.plan();
        ctx.log(&format!(
            "Created EFI: {}  Root: {}",
            plan.efi_partition, plan.root_partition
        ));
        Ok(plan)
    }
}

// ============================================================================
// freespace
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreespaceLayout {
    pub disk: String,
    pub efi_partition: String,
    pub start_mib: u64,
    pub end_mib: u64,
    pub target_size_bytes: u64,
    predicted_root: String,
}

impl FreespaceLayout {
    /// Place the root partition in the first free region that can hold it.
    pub fn new(
        disk: &Disk,
        efi: &Partition,
        table: &parted::PartedTable,
        target_size_bytes: u64,
    ) -> Result<Self> {
        let needed_mib = units::bytes_to_mib_ceil(target_size_bytes);
        let (start_mib, end_mib) = table
            .free
            .iter()
            .find_map(|region| {
                let start = region.start_mib.ceil().max(1.0) as u64;
                let limit = region.end_mib.floor() as u64;
                let end = start + needed_mib;
                (end <= limit).then_some((start, end))
            })
            .ok_or_else(|| InstallError::NoFreeRegion {
                disk: disk.path(),
                needed_mib,
            })?;

        debug!("Free region chosen on {}: {}-{} MiB", disk.name, start_mib, end_mib);
        Ok(Self {
            disk: disk.path(),
            efi_partition: efi.path(),
            start_mib,
            end_mib,
            target_size_bytes,
            predicted_root: partition_path(&disk.name, next_partition_number(disk, table)),
        })
    }

    pub fn mkpart_command(&self) -> CommandSpec {
        mkpart(&self.disk, self.start_mib, self.end_mib)
    }

    fn apply(&self, ctx: &InstallContext<'_>) -> Result<PartitionPlan> {
        ctx.log("Creating root partition in free space");
        let root = create_and_find_new(ctx, &self.disk, &self.predicted_root, &self.mkpart_command())?;
        ctx.log(&format!("Root partition: {}  EFI: {}", root, self.efi_partition));
        Ok(PartitionPlan {
            efi_partition: self.efi_partition.clone(),
            root_partition: root,
            strategy: InstallMode::Freespace,
            target_size_bytes: self.target_size_bytes,
        })
    }
}

fn mkpart(disk: &str, start_mib: u64, end_mib: u64) -> CommandSpec {
    CommandSpec::new(
        "parted",
        [
            "-s".to_string(),
            disk.to_string(),
            "mkpart".into(),
            "primary".into(),
            "ext4".into(),
            format!("{}MiB", start_mib),
            format!("{}MiB", end_mib),
        ],
    )
}

// ============================================================================
// dualboot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualbootLayout {
    pub disk: String,
    pub efi_partition: String,
    pub windows: String,
    pub windows_number: u32,
    /// New size of the NTFS filesystem
    pub shrink_to_bytes: u64,
    /// New end of the Windows partition entry; also the root start
    pub root_start_mib: u64,
    pub root_end_mib: u64,
    pub target_size_bytes: u64,
    predicted_root: String,
}

impl DualbootLayout {
    pub fn new(
        disk: &Disk,
        efi: &Partition,
        windows: &Partition,
        table: &parted::PartedTable,
        target_size_bytes: u64,
    ) -> Result<Self> {
        let shrink_to_bytes = shrink_target(windows.size, target_size_bytes)?;

        let number = windows
            .number()
            .ok_or_else(|| InstallError::UnknownPartitionNumber(windows.name.clone()))?;
        let entry = table.partition(number).ok_or_else(|| {
            InstallError::Parse(crate::error::ParseError::malformed(
                "parted",
                format!("partition {} ({}) missing from table", number, windows.name),
            ))
        })?;

        // The entry must stay at least as large as the filesystem inside it
        let root_start_mib = (entry.start_mib + shrink_to_bytes as f64 / MIB as f64).ceil() as u64;
        let root_end_mib = entry.end_mib.floor() as u64;
        if root_end_mib <= root_start_mib {
            return Err(InstallError::NoFreeRegion {
                disk: disk.path(),
                needed_mib: units::bytes_to_mib_ceil(target_size_bytes),
            });
        }

        Ok(Self {
            disk: disk.path(),
            efi_partition: efi.path(),
            windows: windows.path(),
            windows_number: number,
            shrink_to_bytes,
            root_start_mib,
            root_end_mib,
            target_size_bytes,
            predicted_root: partition_path(&disk.name, next_partition_number(disk, table)),
        })
    }

    pub fn shrink_command(&self) -> CommandSpec {
        CommandSpec::new(
            "ntfsresize",
            [
                "--force".to_string(),
                "--size".into(),
                self.shrink_to_bytes.to_string(),
                self.windows.clone(),
            ],
        )
    }

    pub fn resize_command(&self) -> CommandSpec {
        CommandSpec::new(
            "parted",
            [
                "-s".to_string(),
                self.disk.clone(),
                "resizepart".into(),
                self.windows_number.to_string(),
                format!("{}MiB", self.root_start_mib),
            ],
        )
    }

    pub fn mkpart_command(&self) -> CommandSpec {
        mkpart(&self.disk, self.root_start_mib, self.root_end_mib)
    }

    /// Shrink the NTFS filesystem. The only way to obtain a [`ShrunkFilesystem`].
    pub fn shrink_filesystem(&self, ctx: &InstallContext<'_>) -> Result<ShrunkFilesystem<'_>> {
        ctx.log(&format!(
            "Shrinking Windows partition {} to {}",
            self.windows,
            units::human_bytes(self.shrink_to_bytes)
        ));
        ctx.run(&self.shrink_command())?;
        Ok(ShrunkFilesystem { layout: self })
    }
}

/// Proof that the Windows filesystem already fits inside the shrunk entry.
#[derive(Debug)]
pub struct ShrunkFilesystem<'p> {
    layout: &'p DualbootLayout,
}

impl<'p> ShrunkFilesystem<'p> {
    pub fn resize_partition_entry(self, ctx: &InstallContext<'_>) -> Result<ResizedPartition<'p>> {
        let layout = self.layout;
        ctx.run(&layout.resize_command())?;
        reread_partitions(ctx, &layout.disk)?;
        Ok(ResizedPartition { layout })
    }
}

/// The Windows entry has been shrunk; the freed space can take the root partition.
#[derive(Debug)]
pub struct ResizedPartition<'p> {
    layout: &'p DualbootLayout,
}

impl ResizedPartition<'_> {
    pub fn create_root_partition(self, ctx: &InstallContext<'_>) -> Result<PartitionPlan> {
        let l = self.layout;
        let root = create_and_find_new(ctx, &l.disk, &l.predicted_root, &l.mkpart_command())?;
        ctx.log(&format!(
            "Dualboot partitions ready. EFI: {}  Root: {}",
            l.efi_partition, root
        ));
        Ok(PartitionPlan {
            efi_partition: l.efi_partition.clone(),
            root_partition: root,
            strategy: InstallMode::Dualboot,
            target_size_bytes: l.target_size_bytes,
        })
    }
}

/// Size Windows is shrunk to, refusing to go below the safety floor.
pub fn shrink_target(windows_bytes: u64, arch_bytes: u64) -> Result<u64> {
    let shrink_to_bytes = windows_bytes.saturating_sub(arch_bytes);
    if shrink_to_bytes < WINDOWS_FLOOR_BYTES {
        return Err(InstallError::InsufficientShrinkTarget {
            shrink_to_bytes,
            floor_bytes: WINDOWS_FLOOR_BYTES,
        });
    }
    Ok(shrink_to_bytes)
}
