//! Archey installation backend
//!
//! Everything behind the installer wizard: disk probing and classification,
//! partition planning for the wipe/freespace/dualboot strategies, formatting
//! and mounting, package selection, in-target provisioning, GRUB setup and
//! firmware boot-order prioritization, driven by a single pipeline.

pub mod bootloader;
pub mod cancel;
pub mod chroot_script;
pub mod cli;
pub mod command;
pub mod config;
pub mod context;
pub mod disk;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod install_state;
pub mod logic;
pub mod parsers;
pub mod pipeline;
pub mod probe;
pub mod process_guard;
pub mod progress;
pub mod provision;
pub mod testing;
pub mod types;
pub mod units;

// Re-export main types for convenience
pub use cancel::CancellationToken;
pub use command::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use config::{DesktopEnvironment, InstallConfig, InstallerSettings, Password};
pub use disk::{Disk, Partition, partition_path};
pub use engine::{Layout, PartitionPlan, PlanRequest};
pub use error::{CommandError, InstallError, ParseError, ProbeError};
pub use install_state::{InstallStage, InstallTransitionError, StageTracker};
pub use pipeline::InstallPipeline;
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use progress::{ChannelReporter, InstallEvent, Outcome, ProgressReporter, TracingReporter};
pub use types::{InstallMode, Kernel};
