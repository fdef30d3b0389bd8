use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Archey - Arch Linux installation backend
#[derive(Parser, Debug)]
#[command(name = "archey")]
#[command(about = "Partition, provision and boot-configure an Arch Linux install")]
#[command(version)]
pub struct Cli {
    /// Debug-level logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List disks with their EFI/Windows classification and detected hardware
    Probe {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Show the partition layout an install would apply, without touching the disk
    Plan {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the installation pipeline
    Install {
        #[arg(short, long)]
        config: PathBuf,

        /// Dry-run mode: show what would be executed without making changes.
        ///
        /// Destructive commands and target file writes are skipped and
        /// logged. Read-only probes (lsblk, parted print) still execute so
        /// the preview is realistic.
        #[arg(long)]
        dry_run: bool,

        /// Confirm that the disk may be modified (required unless --dry-run)
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
