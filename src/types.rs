//! Type-safe configuration enums
//!
//! Install modes and kernel variants as proper Rust enums with strum-derived
//! string forms, so configuration files and CLI output share one spelling.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Partitioning strategy. Exactly one is chosen per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstallMode {
    /// Erase the disk, new GPT with a fresh ESP and root
    #[default]
    Wipe,
    /// New root partition in unallocated space, existing ESP reused
    Freespace,
    /// Shrink the Windows partition and install into the freed space
    Dualboot,
}

impl InstallMode {
    /// Only wipe creates (and therefore formats) its own EFI partition.
    pub fn creates_efi(&self) -> bool {
        matches!(self, Self::Wipe)
    }

    /// Whether os-prober should look for other systems.
    pub fn probes_foreign_os(&self) -> bool {
        matches!(self, Self::Dualboot)
    }
}

/// Linux kernel variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Kernel {
    #[default]
    #[strum(serialize = "linux")]
    #[serde(rename = "linux")]
    Linux,
    #[strum(serialize = "linux-lts")]
    #[serde(rename = "linux-lts")]
    LinuxLts,
    #[strum(serialize = "linux-zen")]
    #[serde(rename = "linux-zen")]
    LinuxZen,
    #[strum(serialize = "linux-hardened")]
    #[serde(rename = "linux-hardened")]
    LinuxHardened,
}

impl Kernel {
    /// Look up a kernel by its package key. Unknown keys fall back to `linux`.
    pub fn from_key(key: &str) -> Self {
        Self::from_str(key.trim()).unwrap_or_default()
    }

    /// Kernel image and matching headers.
    pub fn packages(&self) -> [&'static str; 2] {
        match self {
            Self::Linux => ["linux", "linux-headers"],
            Self::LinuxLts => ["linux-lts", "linux-lts-headers"],
            Self::LinuxZen => ["linux-zen", "linux-zen-headers"],
            Self::LinuxHardened => ["linux-hardened", "linux-hardened-headers"],
        }
    }
}
