//! Property-Based Tests for Archey
//!
//! These tests verify:
//! - Partition device naming across disk kinds
//! - Package set deduplication and desktop filtering
//! - Dual-boot shrink floor arithmetic
//! - Boot-order reordering
//! - Wipe layout geometry

use archey::disk::{Disk, Partition, find_efi, partition_number, partition_path};
use archey::engine::planner::{EFI_PARTITION_MIB, MIN_ROOT_BYTES, WINDOWS_FLOOR_BYTES, WipeLayout, shrink_target};
use archey::logic::boot_order::move_to_front;
use archey::logic::packages::PackageSetBuilder;
use archey::types::Kernel;
use archey::units::MIB;
use archey::InstallError;
use proptest::prelude::*;
use std::collections::HashSet;

// =============================================================================
// Partition Naming
// =============================================================================

fn conventional_disk() -> impl Strategy<Value = String> {
    prop_oneof![
        "sd[a-z]{1,2}".prop_map(String::from),
        "vd[a-z]".prop_map(String::from),
        "hd[a-d]".prop_map(String::from),
    ]
}

fn p_separated_disk() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..8, 1u8..4).prop_map(|(c, n)| format!("nvme{}n{}", c, n)),
        (0u8..4).prop_map(|c| format!("mmcblk{}", c)),
    ]
}

proptest! {
    /// Conventional disks append the number directly
    #[test]
    fn conventional_partition_path(disk in conventional_disk(), n in 1u32..128) {
        prop_assert_eq!(partition_path(&disk, n), format!("/dev/{}{}", disk, n));
    }

    /// NVMe and MMC devices insert a `p`
    #[test]
    fn p_separated_partition_path(disk in p_separated_disk(), n in 1u32..128) {
        let path = partition_path(&disk, n);
        prop_assert_eq!(&path, &format!("/dev/{}p{}", disk, n));
        prop_assert_eq!(partition_number(&path), Some(n));
    }

    /// A `/dev/` prefix on the input changes nothing
    #[test]
    fn partition_path_accepts_device_paths(disk in p_separated_disk(), n in 1u32..128) {
        prop_assert_eq!(partition_path(&format!("/dev/{}", disk), n), partition_path(&disk, n));
    }
}

// =============================================================================
// Package Sets
// =============================================================================

fn package_list() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,3}(-[a-z]{1,3})?", 0..12)
}

proptest! {
    /// Every package appears exactly once, whatever the overlap between sources
    #[test]
    fn package_set_has_no_duplicates(
        cpu in package_list(),
        gpu in package_list(),
        user in package_list(),
        advanced in package_list(),
    ) {
        let set = PackageSetBuilder::new(Kernel::Linux)
            .cpu(&cpu)
            .gpu(&gpu)
            .extras(&user)
            .extras(&advanced)
            .build();

        let unique: HashSet<&String> = set.as_slice().iter().collect();
        prop_assert_eq!(unique.len(), set.len());
        for package in cpu.iter().chain(&gpu).chain(&user).chain(&advanced) {
            prop_assert!(set.contains(package));
        }
    }

    /// Building twice gives the same ordered list
    #[test]
    fn package_set_is_deterministic(user in package_list(), desktop in package_list()) {
        let builder = PackageSetBuilder::new(Kernel::LinuxLts).extras(&user).desktop(&desktop);
        prop_assert_eq!(builder.build(), builder.build());
    }

    /// Extras shared with the desktop are left for the desktop step
    #[test]
    fn desktop_packages_are_not_pacstrapped(user in package_list(), desktop in package_list()) {
        let set = PackageSetBuilder::new(Kernel::Linux).extras(&user).desktop(&desktop).build();
        for package in &user {
            let in_base = archey::logic::packages::BASE_PACKAGES.contains(&package.as_str())
                || Kernel::Linux.packages().contains(&package.as_str());
            if desktop.contains(package) && !in_base {
                prop_assert!(!set.contains(package), "{} should be deferred", package);
            }
        }
    }
}

// =============================================================================
// Dual-boot Shrink Floor
// =============================================================================

proptest! {
    #[test]
    fn shrink_respects_floor(windows in 0u64..(2048 * 1024 * MIB), arch in 0u64..(2048 * 1024 * MIB)) {
        match shrink_target(windows, arch) {
            Ok(shrink_to) => {
                prop_assert_eq!(shrink_to, windows - arch);
                prop_assert!(shrink_to >= WINDOWS_FLOOR_BYTES);
            }
            Err(InstallError::InsufficientShrinkTarget { shrink_to_bytes, floor_bytes }) => {
                prop_assert_eq!(floor_bytes, WINDOWS_FLOOR_BYTES);
                prop_assert!(shrink_to_bytes < WINDOWS_FLOOR_BYTES);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }
}

// =============================================================================
// Boot Order
// =============================================================================

fn boot_ids() -> impl Strategy<Value = Vec<String>> {
    prop::collection::hash_set(0u16..0x40, 1..10)
        .prop_map(|ids| ids.into_iter().map(|id| format!("{:04X}", id)).collect())
}

proptest! {
    /// The chosen entry leads; everything else keeps its relative order
    #[test]
    fn move_to_front_preserves_rest(order in boot_ids(), pick in any::<prop::sample::Index>()) {
        let id = order[pick.index(order.len())].clone();
        let reordered = move_to_front(&order, &id);

        prop_assert_eq!(reordered.len(), order.len());
        prop_assert_eq!(&reordered[0], &id);
        let rest: Vec<&String> = order.iter().filter(|o| **o != id).collect();
        let tail: Vec<&String> = reordered[1..].iter().collect();
        prop_assert_eq!(tail, rest);
    }
}

// =============================================================================
// Wipe Geometry and EFI Detection
// =============================================================================

proptest! {
    #[test]
    fn wipe_layout_geometry(extra in 1u64..(4096 * 1024 * MIB)) {
        let size = EFI_PARTITION_MIB * MIB + MIN_ROOT_BYTES + extra;
        let disk = Disk { name: "sda".into(), size, model: "Test".into(), partitions: vec![] };
        let layout = WipeLayout::for_disk(&disk).unwrap();

        prop_assert_eq!(layout.efi_size_bytes(), EFI_PARTITION_MIB * MIB);
        prop_assert_eq!(layout.root_bytes, size - EFI_PARTITION_MIB * MIB);
        let create = layout.commands()[2].to_string();
        prop_assert!(create.contains("-n 1:0:+512M"));
        prop_assert!(create.contains("-n 2:0:0"));
    }

    /// No "efi"/"esp" anywhere means no EFI partition; otherwise the first match wins
    #[test]
    fn find_efi_picks_first_match(labels in prop::collection::vec("[a-df-z]{0,6}", 0..6), at in any::<prop::sample::Index>()) {
        let mut partitions: Vec<Partition> = labels
            .iter()
            .enumerate()
            .map(|(i, label)| Partition {
                name: format!("sda{}", i + 1),
                label: label.clone(),
                fstype: "ext4".into(),
                ..Partition::default()
            })
            .collect();
        prop_assert!(find_efi(&partitions).is_none());

        if !partitions.is_empty() {
            let idx = at.index(partitions.len());
            partitions[idx].fstype = "vfat".into();
            partitions[idx].label = "EFI".into();
            partitions.push(Partition { name: "sda9".into(), label: "ESP".into(), ..Partition::default() });
            prop_assert_eq!(&find_efi(&partitions).unwrap().name, &partitions[idx].name);
        }
    }
}
