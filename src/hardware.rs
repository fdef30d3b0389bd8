//! Hardware environment detection
//!
//! Detects firmware mode (UEFI vs BIOS), CPU vendor and GPU vendor. The
//! results drive the `probe` report, the microcode/driver package suggestions
//! handed to the wizard, and a preflight warning when the live system was not
//! booted in UEFI mode (every install mode here targets an EFI system
//! partition).
//!
//! # Failure Mode
//!
//! Detection never fails. An unreadable `/proc/cpuinfo` yields
//! `CpuVendor::Unknown`; a missing, failing or slow `lspci` (5 second bound)
//! yields `GpuVendor::Generic`.

use crate::command::{CommandRunner, CommandSpec};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Bound on `lspci`; a hang is treated as "no GPU found".
pub const LSPCI_TIMEOUT: Duration = Duration::from_secs(5);

/// Detected firmware mode of the system.
///
/// Determined by checking for the existence of `/sys/firmware/efi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    /// UEFI firmware: ESP partition, efibootmgr available
    Uefi,
    /// Legacy BIOS firmware
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// CPU manufacturer, for microcode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

impl CpuVendor {
    pub fn microcode_packages(self) -> &'static [&'static str] {
        match self {
            Self::Intel => &["intel-ucode"],
            Self::Amd => &["amd-ucode"],
            Self::Unknown => &[],
        }
    }
}

impl fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intel => write!(f, "Intel"),
            Self::Amd => write!(f, "AMD"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Graphics vendor, for driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    /// Virtual machine or unrecognised adapter
    Generic,
}

impl GpuVendor {
    pub fn driver_packages(self) -> &'static [&'static str] {
        match self {
            Self::Nvidia => &["nvidia", "nvidia-utils", "nvidia-settings", "lib32-nvidia-utils"],
            Self::Amd => &[
                "xf86-video-amdgpu",
                "mesa",
                "vulkan-radeon",
                "lib32-mesa",
                "lib32-vulkan-radeon",
            ],
            Self::Intel => &["xf86-video-intel", "mesa", "vulkan-intel", "lib32-mesa"],
            Self::Generic => &["xf86-video-vesa", "mesa"],
        }
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvidia => write!(f, "NVIDIA"),
            Self::Amd => write!(f, "AMD"),
            Self::Intel => write!(f, "Intel"),
            Self::Generic => write!(f, "Generic / VM"),
        }
    }
}

/// Aggregated hardware detection results.
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub firmware: FirmwareMode,
    pub cpu: CpuVendor,
    /// `model name` from cpuinfo, if present
    pub cpu_model: Option<String>,
    pub gpu: GpuVendor,
    /// Device description from the first display controller line
    pub gpu_model: Option<String>,
}

impl HardwareInfo {
    /// Detect the live environment. Never fails.
    pub fn detect(runner: &dyn CommandRunner) -> Self {
        let firmware = detect_firmware_mode();

        let (cpu, cpu_model) = match std::fs::read_to_string("/proc/cpuinfo") {
            Ok(text) => cpu_from_cpuinfo(&text),
            Err(e) => {
                warn!("Could not read /proc/cpuinfo: {}", e);
                (CpuVendor::Unknown, None)
            }
        };

        let spec = CommandSpec::probe("lspci", Vec::<String>::new()).with_timeout(LSPCI_TIMEOUT);
        let (gpu, gpu_model) = match runner.run(&spec, &mut |_| {}) {
            Ok(output) if output.success() => gpu_from_lspci(&output.stdout),
            Ok(output) => {
                warn!("lspci exited with {:?}", output.exit_code);
                (GpuVendor::Generic, None)
            }
            Err(e) => {
                warn!("GPU detection skipped: {}", e);
                (GpuVendor::Generic, None)
            }
        };

        info!(
            "Hardware detection: firmware={}, cpu={}, gpu={}",
            firmware, cpu, gpu
        );

        Self {
            firmware,
            cpu,
            cpu_model,
            gpu,
            gpu_model,
        }
    }
}

impl HardwareInfo {
    /// Microcode and driver packages for this machine, for the wizard to
    /// offer as `cpu_packages` / `gpu_packages`.
    pub fn suggested_packages(&self) -> (&'static [&'static str], &'static [&'static str]) {
        (self.cpu.microcode_packages(), self.gpu.driver_packages())
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Firmware: {}, CPU: {}, GPU: {}",
            self.firmware, self.cpu, self.gpu
        )
    }
}

/// Detect firmware mode by checking for the EFI sysfs directory.
pub fn detect_firmware_mode() -> FirmwareMode {
    firmware_mode_at(Path::new("/sys/firmware/efi"))
}

fn firmware_mode_at(efi_path: &Path) -> FirmwareMode {
    if efi_path.exists() {
        FirmwareMode::Uefi
    } else {
        FirmwareMode::Bios
    }
}

/// CPU vendor from the first `model name` line of `/proc/cpuinfo`.
pub fn cpu_from_cpuinfo(cpuinfo: &str) -> (CpuVendor, Option<String>) {
    let Some(model) = cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, name)| name.trim().to_string())
    else {
        return (CpuVendor::Unknown, None);
    };

    let lower = model.to_lowercase();
    let vendor = if lower.contains("intel") {
        CpuVendor::Intel
    } else if lower.contains("amd") {
        CpuVendor::Amd
    } else {
        CpuVendor::Unknown
    };
    (vendor, Some(model))
}

/// GPU vendor from the first display-controller line of `lspci` output.
pub fn gpu_from_lspci(lspci: &str) -> (GpuVendor, Option<String>) {
    const CLASSES: [&str; 4] = ["vga", "3d", "display", "graphics"];

    for line in lspci.lines() {
        let lower = line.to_lowercase();
        if !CLASSES.iter().any(|c| lower.contains(c)) {
            continue;
        }

        let name = line.splitn(3, ':').last().map(|s| s.trim().to_string());
        let vendor = if lower.contains("nvidia") {
            GpuVendor::Nvidia
        } else if lower.contains("amd") || lower.contains("radeon") || lower.contains("advanced micro") {
            GpuVendor::Amd
        } else if lower.contains("intel") {
            GpuVendor::Intel
        } else {
            GpuVendor::Generic
        };
        return (vendor, name);
    }

    (GpuVendor::Generic, None)
}
