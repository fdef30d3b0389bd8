//! Disk inventory model and partition classification.
//!
//! A [`Disk`] is an immutable snapshot taken at probe time. Classification
//! picks out the EFI system partition and the largest NTFS partition (the
//! Windows install a dual-boot shrinks); nothing here mutates the disk.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Kernel name, e.g. `sda1` or `nvme0n1p2`
    pub name: String,
    pub size: u64,
    /// Empty when unknown
    pub fstype: String,
    pub label: String,
    /// Empty when not mounted
    pub mountpoint: String,
}

impl Partition {
    pub fn path(&self) -> String {
        device_path(&self.name)
    }

    pub fn number(&self) -> Option<u32> {
        partition_number(&self.name)
    }

    fn looks_like_efi(&self) -> bool {
        [&self.fstype, &self.label].iter().any(|field| {
            let lower = field.to_lowercase();
            lower.contains("efi") || lower.contains("esp")
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub size: u64,
    pub model: String,
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn path(&self) -> String {
        device_path(&self.name)
    }

    pub fn partition(&self, name: &str) -> Option<&Partition> {
        let name = name.strip_prefix("/dev/").unwrap_or(name);
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn classify(&self) -> Classification<'_> {
        Classification {
            efi: find_efi(&self.partitions),
            windows: find_foreign_os(&self.partitions),
            free_bytes: free_space_bytes(self),
        }
    }
}

/// What the planner needs to know about an existing disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification<'a> {
    pub efi: Option<&'a Partition>,
    pub windows: Option<&'a Partition>,
    pub free_bytes: u64,
}

/// First partition whose filesystem type or label mentions "efi" or "esp".
pub fn find_efi(partitions: &[Partition]) -> Option<&Partition> {
    partitions.iter().find(|p| p.looks_like_efi())
}

/// Largest NTFS partition; on a tie the first one seen wins.
pub fn find_foreign_os(partitions: &[Partition]) -> Option<&Partition> {
    partitions
        .iter()
        .filter(|p| p.fstype.eq_ignore_ascii_case("ntfs"))
        .fold(None, |best: Option<&Partition>, p| match best {
            Some(b) if b.size >= p.size => Some(b),
            _ => Some(p),
        })
}

/// Disk size minus the sum of partition sizes, clamped at zero.
pub fn free_space_bytes(disk: &Disk) -> u64 {
    let used = disk
        .partitions
        .iter()
        .fold(0u64, |acc, p| acc.saturating_add(p.size));
    disk.size.saturating_sub(used)
}

/// NVMe and MMC devices separate the partition number with `p`.
fn uses_p_separator(disk: &str) -> bool {
    disk.contains("nvme") || disk.contains("mmcblk")
}

/// Device path of partition `number` on `disk` (`sda` → `/dev/sda2`,
/// `nvme0n1` → `/dev/nvme0n1p2`). Accepts names with or without `/dev/`.
pub fn partition_path(disk: &str, number: u32) -> String {
    let base = device_path(disk);
    if uses_p_separator(&base) {
        format!("{}p{}", base, number)
    } else {
        format!("{}{}", base, number)
    }
}

/// Partition number from a partition device name or path.
pub fn partition_number(device: &str) -> Option<u32> {
    let digits_start = device
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;

    let (stem, digits) = device.split_at(digits_start);
    if uses_p_separator(device) && !stem.ends_with('p') {
        return None;
    }
    digits.parse().ok()
}

pub(crate) fn device_path(name: &str) -> String {
    if name.starts_with("/dev/") {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::GIB;

    fn part(name: &str, size: u64, fstype: &str, label: &str) -> Partition {
        Partition {
            name: name.into(),
            size,
            fstype: fstype.into(),
            label: label.into(),
            mountpoint: String::new(),
        }
    }

    #[test]
    fn test_find_efi_by_fstype_or_label() {
        let parts = vec![
            part("sda1", 16 << 20, "", "Microsoft reserved"),
            part("sda2", 100 << 20, "vfat", "ESP"),
            part("sda3", 200 << 20, "vfat", "EFI"),
        ];
        assert_eq!(find_efi(&parts).map(|p| p.name.as_str()), Some("sda2"));

        let parts = vec![part("sda1", 1, "ext4", "root"), part("sda2", 1, "ntfs", "Windows")];
        assert!(find_efi(&parts).is_none());
    }

    #[test]
    fn test_find_foreign_os_prefers_largest_then_first() {
        let parts = vec![
            part("sda2", 500 << 20, "ntfs", "Recovery"),
            part("sda3", 200 * GIB, "ntfs", "Windows"),
            part("sda4", 200 * GIB, "NTFS", "Data"),
            part("sda5", 300 * GIB, "ext4", "home"),
        ];
        assert_eq!(find_foreign_os(&parts).map(|p| p.name.as_str()), Some("sda3"));
        assert!(find_foreign_os(&parts[4..]).is_none());
    }

    #[test]
    fn test_free_space_clamps_at_zero() {
        let disk = Disk {
            name: "sda".into(),
            size: 10 * GIB,
            model: "Test".into(),
            partitions: vec![part("sda1", 6 * GIB, "ext4", ""), part("sda2", 6 * GIB, "ext4", "")],
        };
        assert_eq!(free_space_bytes(&disk), 0);

        let disk = Disk {
            partitions: vec![part("sda1", 4 * GIB, "ext4", "")],
            ..disk
        };
        assert_eq!(free_space_bytes(&disk), 6 * GIB);
    }

    #[test]
    fn test_partition_path_naming() {
        assert_eq!(partition_path("sda", 1), "/dev/sda1");
        assert_eq!(partition_path("/dev/vdb", 2), "/dev/vdb2");
        assert_eq!(partition_path("nvme0n1", 2), "/dev/nvme0n1p2");
        assert_eq!(partition_path("/dev/mmcblk0", 1), "/dev/mmcblk0p1");
    }

    #[test]
    fn test_partition_number() {
        assert_eq!(partition_number("sda3"), Some(3));
        assert_eq!(partition_number("/dev/sdb12"), Some(12));
        assert_eq!(partition_number("nvme0n1p4"), Some(4));
        assert_eq!(partition_number("mmcblk0p1"), Some(1));
        assert_eq!(partition_number("nvme0n1"), None);
        assert_eq!(partition_number("sda"), None);
    }

    #[test]
    fn test_disk_partition_lookup_accepts_dev_prefix() {
        let disk = Disk {
            name: "sda".into(),
            size: GIB,
            model: String::new(),
            partitions: vec![part("sda1", 1, "vfat", "EFI")],
        };
        assert!(disk.partition("/dev/sda1").is_some());
        assert!(disk.partition("sda2").is_none());
        assert_eq!(disk.classify().efi.map(Partition::path), Some("/dev/sda1".into()));
    }
}
