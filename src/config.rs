//! Installation configuration.
//!
//! `InstallConfig` is the single artifact the wizard hands to the backend. It
//! is loaded from JSON, validated for structural completeness and then treated
//! as read-only for the rest of the run. `InstallerSettings` carries the fixed
//! environment knobs (mount root, asset paths, product name) with defaults
//! matching the live ISO.

use crate::types::{InstallMode, Kernel};
use crate::units;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// The user's password. Wiped from memory on drop, redacted in `Debug`,
/// and never written back out when a config is saved.
#[derive(Clone, Default)]
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl Serialize for Password {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Password::new)
    }
}

/// Desktop environment selection. Installed after base configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopEnvironment {
    pub name: String,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Service unit enabled once the packages are in place (e.g. `sddm`)
    #[serde(default)]
    pub display_manager: Option<String>,
}

/// Fixed environment knobs with live-ISO defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Where the target root is mounted
    pub mount_root: PathBuf,
    /// The live system's pacman configuration
    pub pacman_conf: PathBuf,
    /// Bootloader theme assets shipped on the ISO
    pub theme_source: PathBuf,
    /// Matched against firmware boot labels and used for branding
    pub product_name: String,
    pub bootloader_id: String,
    /// Delay after a partition table reread before probing again
    pub settle_delay_ms: u64,
    pub probe_timeout_secs: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/mnt"),
            pacman_conf: PathBuf::from("/etc/pacman.conf"),
            theme_source: PathBuf::from("/usr/local/share/archey-grub"),
            product_name: "Archey".to_string(),
            bootloader_id: "Archey".to_string(),
            settle_delay_ms: 1000,
            probe_timeout_secs: 10,
        }
    }
}

impl InstallerSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// The ESP mount point inside the target.
    pub fn efi_mount(&self) -> PathBuf {
        self.mount_root.join("boot/efi")
    }
}

/// Installation configuration produced by the wizard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Disk name as lsblk reports it (`sda`, `nvme0n1`); a `/dev/` prefix is accepted
    pub disk: String,
    pub mode: InstallMode,

    /// Space for Arch in freespace/dualboot modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_size_bytes: Option<u64>,
    /// Convenience alternative to `target_size_bytes` (1 GiB = 1024³ bytes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch_size_gb: Option<f64>,

    pub timezone: String,
    pub locale: String,
    pub keymap: String,
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub password: Password,

    #[serde(default = "default_kernel")]
    pub kernel: String,
    #[serde(default)]
    pub desktop: Option<DesktopEnvironment>,

    #[serde(default)]
    pub cpu_packages: Vec<String>,
    #[serde(default)]
    pub gpu_packages: Vec<String>,
    #[serde(default)]
    pub user_packages: Vec<String>,
    #[serde(default)]
    pub advanced_packages: Vec<String>,
    #[serde(default)]
    pub system_packages: Vec<String>,
    /// systemd units enabled inside the target
    #[serde(default)]
    pub services: Vec<String>,

    /// Pre-classified partitions (names as lsblk reports them)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efi_partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_partition: Option<String>,

    #[serde(default)]
    pub settings: InstallerSettings,
}

fn default_kernel() -> String {
    Kernel::default().to_string()
}

impl InstallConfig {
    /// Save configuration to a JSON file. The password is not written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        // The file holds the plaintext password
        let content = Zeroizing::new(
            fs::read_to_string(&path)
                .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?,
        );

        let config: Self =
            serde_json::from_str(content.as_str()).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Structural validation. Field formats are the wizard's responsibility.
    pub fn validate(&self) -> Result<()> {
        if self.disk_name().is_empty() {
            anyhow::bail!("Install disk must be specified");
        }

        for (field, value) in [
            ("timezone", &self.timezone),
            ("locale", &self.locale),
            ("keymap", &self.keymap),
            ("hostname", &self.hostname),
            ("username", &self.username),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must be specified", field);
            }
        }

        if self.password.is_empty() {
            anyhow::bail!("User password must be specified");
        }

        // Each value becomes one line of the provisioning script and of chpasswd input
        for (field, value) in [
            ("timezone", self.timezone.as_str()),
            ("locale", self.locale.as_str()),
            ("keymap", self.keymap.as_str()),
            ("hostname", self.hostname.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.expose()),
        ] {
            if value.contains(['\n', '\r']) {
                anyhow::bail!("{} must not contain line breaks", field);
            }
        }

        if self.mode != InstallMode::Wipe && self.target_size_bytes() == 0 {
            anyhow::bail!(
                "{} mode requires target_size_bytes or arch_size_gb",
                self.mode
            );
        }

        if let Some(de) = &self.desktop
            && de.name.trim().is_empty()
        {
            anyhow::bail!("Desktop environment name must not be empty");
        }

        Ok(())
    }

    /// Bare disk name, without `/dev/`.
    pub fn disk_name(&self) -> &str {
        let name = self.disk.trim();
        name.strip_prefix("/dev/").unwrap_or(name)
    }

    pub fn disk_path(&self) -> String {
        format!("/dev/{}", self.disk_name())
    }

    /// Requested Arch size. `target_size_bytes` wins over `arch_size_gb`.
    pub fn target_size_bytes(&self) -> u64 {
        self.target_size_bytes
            .or_else(|| self.arch_size_gb.map(units::gib_to_bytes))
            .unwrap_or(0)
    }

    pub fn kernel(&self) -> Kernel {
        Kernel::from_key(&self.kernel)
    }

    /// The desktop environment, if one with packages was selected.
    pub fn desktop_to_install(&self) -> Option<&DesktopEnvironment> {
        self.desktop.as_ref().filter(|de| !de.packages.is_empty())
    }
}
