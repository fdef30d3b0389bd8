//! Package set resolution
//!
//! Merges every package source into one deduplicated, insertion-ordered list
//! for `pacstrap`.
//!
//! # Resolution Order
//!
//! | Source            | Filtered against |
//! |-------------------|------------------|
//! | base              | already added |
//! | kernel + headers  | already added |
//! | CPU microcode     | already added |
//! | GPU drivers       | already added |
//! | user selections   | already added, desktop packages |
//! | advanced extras   | already added, desktop packages |
//! | system extras     | already added, desktop packages |
//!
//! Desktop-environment packages are not part of this list. They are installed
//! in a separate step after base configuration, right before the display
//! manager is enabled.
//!
//! No dependency resolution happens here; that is pacman's job.

use crate::config::InstallConfig;
use crate::types::Kernel;
use std::collections::HashSet;

/// Installed on every system.
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "base-devel",
    "linux-firmware",
    "mkinitcpio",
    "networkmanager",
    "iwd",
    "sudo",
    "nano",
    "vim",
    "git",
    "curl",
    "wget",
    "grub",
    "efibootmgr",
    "os-prober",
    "bash-completion",
    "man-db",
    "man-pages",
];

/// Ordered set of package names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    packages: Vec<String>,
    seen: HashSet<String>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package unless it is already present or blank. Returns whether it was added.
    pub fn insert(&mut self, package: &str) -> bool {
        let package = package.trim();
        if package.is_empty() || self.seen.contains(package) {
            return false;
        }
        self.seen.insert(package.to_string());
        self.packages.push(package.to_string());
        true
    }

    pub fn extend<I, S>(&mut self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in packages {
            self.insert(p.as_ref());
        }
    }

    pub fn contains(&self, package: &str) -> bool {
        self.seen.contains(package)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.packages
    }

    pub fn into_vec(self) -> Vec<String> {
        self.packages
    }

    /// 32-bit packages require the multilib repository.
    pub fn needs_multilib(&self) -> bool {
        self.packages.iter().any(|p| p.starts_with("lib32-"))
    }
}

/// Collects the package sources of an install.
#[derive(Debug, Clone, Default)]
pub struct PackageSetBuilder<'a> {
    kernel: Kernel,
    cpu: &'a [String],
    gpu: &'a [String],
    extras: Vec<&'a [String]>,
    desktop: &'a [String],
}

impl<'a> PackageSetBuilder<'a> {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            ..Self::default()
        }
    }

    pub fn from_config(config: &'a InstallConfig) -> Self {
        let mut builder = Self::new(config.kernel())
            .cpu(&config.cpu_packages)
            .gpu(&config.gpu_packages)
            .extras(&config.user_packages)
            .extras(&config.advanced_packages)
            .extras(&config.system_packages);
        if let Some(de) = &config.desktop {
            builder = builder.desktop(&de.packages);
        }
        builder
    }

    pub fn cpu(mut self, packages: &'a [String]) -> Self {
        self.cpu = packages;
        self
    }

    pub fn gpu(mut self, packages: &'a [String]) -> Self {
        self.gpu = packages;
        self
    }

    /// User-selected packages; may be called repeatedly, order is kept.
    pub fn extras(mut self, packages: &'a [String]) -> Self {
        self.extras.push(packages);
        self
    }

    /// Packages the desktop step installs later; excluded from extras.
    pub fn desktop(mut self, packages: &'a [String]) -> Self {
        self.desktop = packages;
        self
    }

    pub fn build(&self) -> PackageSet {
        let mut set = PackageSet::new();
        set.extend(BASE_PACKAGES);
        set.extend(self.kernel.packages());
        set.extend(self.cpu);
        set.extend(self.gpu);

        let desktop: HashSet<&str> = self.desktop.iter().map(|p| p.trim()).collect();
        for package in self.extras.iter().flat_map(|list| list.iter()) {
            if !desktop.contains(package.trim()) {
                set.insert(package);
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_base_then_kernel_first() {
        let set = PackageSetBuilder::new(Kernel::LinuxZen).build();
        let list = set.as_slice();
        assert_eq!(&list[..BASE_PACKAGES.len()], BASE_PACKAGES);
        assert_eq!(list[BASE_PACKAGES.len()], "linux-zen");
        assert_eq!(list[BASE_PACKAGES.len() + 1], "linux-zen-headers");
    }

    #[test]
    fn test_extras_skip_duplicates_and_desktop_packages() {
        let cpu = strings(&["intel-ucode"]);
        let gpu = strings(&["mesa", "lib32-mesa"]);
        let user = strings(&["firefox", "git", "plasma-desktop"]);
        let advanced = strings(&["firefox", "htop"]);
        let system = strings(&["mesa", "cups"]);
        let de = strings(&["plasma-desktop", "sddm"]);

        let set = PackageSetBuilder::new(Kernel::Linux)
            .cpu(&cpu)
            .gpu(&gpu)
            .extras(&user)
            .extras(&advanced)
            .extras(&system)
            .desktop(&de)
            .build();

        let tail: Vec<&str> = set.as_slice()[BASE_PACKAGES.len() + 2..]
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(tail, vec!["intel-ucode", "mesa", "lib32-mesa", "firefox", "htop", "cups"]);
        assert!(!set.contains("plasma-desktop"));
        assert!(set.needs_multilib());
    }

    #[test]
    fn test_blank_entries_ignored() {
        let mut set = PackageSet::new();
        assert!(!set.insert("  "));
        assert!(set.insert(" vim "));
        assert!(!set.insert("vim"));
        assert_eq!(set.into_vec(), vec!["vim"]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let user = strings(&["steam", "lib32-pipewire"]);
        let builder = PackageSetBuilder::new(Kernel::LinuxLts).extras(&user);
        assert_eq!(builder.build(), builder.build());
    }
}
