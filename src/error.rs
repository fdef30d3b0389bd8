//! Error handling module for the installer backend
//!
//! Provides the typed errors used across the crate, built with thiserror.
//! Each layer has its own error type: tool-output parsers (`ParseError`),
//! external command wrappers (`CommandError`), the disk probe (`ProbeError`)
//! and finally `InstallError`, which is what the pipeline surfaces to callers.

use crate::types::InstallMode;
use std::io;
use thiserror::Error;

/// Maximum number of characters of command output carried in a failure.
pub const OUTPUT_TAIL_CHARS: usize = 700;

/// Failure to interpret the output of a system tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Output was present but did not have the expected shape
    #[error("{tool}: malformed output: {reason}")]
    Malformed { tool: &'static str, reason: String },

    /// A required element was absent from the output
    #[error("{tool}: no {what} found in output")]
    Missing { tool: &'static str, what: &'static str },
}

impl ParseError {
    pub fn malformed(tool: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            tool,
            reason: reason.into(),
        }
    }
}

/// Uniform error raised by every external-command wrapper.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program could not be started (usually: not installed)
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully
    #[error("Command failed (exit {}):\n  {command}\n{output_tail}", exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        output_tail: String,
    },

    /// A bounded probe did not finish in time
    #[error("`{command}` timed out after {seconds}s")]
    TimedOut { command: String, seconds: u64 },

    /// The cancellation token tripped while the command was running
    #[error("`{command}` was cancelled")]
    Cancelled { command: String },

    /// Waiting on or reading from the child failed
    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl CommandError {
    /// True when the program itself is missing from the system.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Failure to obtain a disk inventory. Fatal to the wizard step, not the process.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("{tool} is not available on this system")]
    ToolUnavailable { tool: &'static str },

    #[error("Disk probe failed: {0}")]
    Command(#[from] CommandError),

    #[error("Disk probe returned malformed output: {0}")]
    Malformed(#[from] ParseError),

    #[error("Disk '{0}' not found")]
    DiskNotFound(String),
}

/// Main error type for the installation backend.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Probe(ProbeError),

    #[error(transparent)]
    Command(CommandError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    /// freespace and dualboot reuse the existing ESP and never create one
    #[error("No EFI partition found on {disk}: {mode} mode requires an existing EFI system partition")]
    NoEfiPartition { disk: String, mode: InstallMode },

    #[error("No Windows (NTFS) partition found on {disk} for dual-boot installation")]
    NoWindowsPartition { disk: String },

    #[error(
        "Shrinking Windows to {:.1} GiB is too small (minimum {:.1} GiB); allocate less space for Arch",
        *shrink_to_bytes as f64 / crate::units::GIB as f64,
        *floor_bytes as f64 / crate::units::GIB as f64
    )]
    InsufficientShrinkTarget {
        shrink_to_bytes: u64,
        floor_bytes: u64,
    },

    #[error("Disk {disk} is too small: {size_bytes} bytes, need more than {required_bytes} bytes")]
    DiskTooSmall {
        disk: String,
        size_bytes: u64,
        required_bytes: u64,
    },

    #[error("No free region large enough on {disk} (need {needed_mib} MiB)")]
    NoFreeRegion { disk: String, needed_mib: u64 },

    #[error("Could not determine newly created root partition on {disk}")]
    RootPartitionNotFound { disk: String },

    #[error("Could not parse partition number from {0}")]
    UnknownPartitionNumber(String),

    #[error("genfstab produced empty output")]
    EmptyFstab,

    #[error("An installation is already running")]
    AlreadyRunning,

    #[error("Installation cancelled")]
    Cancelled,

    #[error("Install state error: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ProbeError> for InstallError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Command(CommandError::Cancelled { .. }) => Self::Cancelled,
            other => Self::Probe(other),
        }
    }
}

impl From<CommandError> for InstallError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Cancelled { .. } => Self::Cancelled,
            other => Self::Command(other),
        }
    }
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallError>;

impl InstallError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Wrap an I/O error with the operation that produced it
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Cancellation is reported separately from failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Command(CommandError::Cancelled { .. })
                | Self::Probe(ProbeError::Command(CommandError::Cancelled { .. }))
        )
    }
}

/// Returns the last `max_chars` characters of `output`, respecting UTF-8 boundaries.
pub fn output_tail(output: &str, max_chars: usize) -> String {
    let count = output.chars().count();
    if count <= max_chars {
        return output.to_string();
    }
    output.chars().skip(count - max_chars).collect()
}
