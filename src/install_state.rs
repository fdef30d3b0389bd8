//! Install State Machine
//!
//! Authoritative record of where a pipeline run is. Transitions are
//! validated: stages only move forward, one at a time, and the destructive
//! partitioning stage cannot be entered without explicit confirmation.
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Partitioning          5%   (destructive, needs confirmation)
//!     ↓
//! Formatting           15%
//!     ↓
//! Mounting             20%
//!     ↓
//! InstallingBase       25%
//!     ↓
//! GeneratingFstab      60%
//!     ↓
//! Configuring          65%
//!     ↓
//! InstallingBootloader 85%
//!     ↓
//! InstallingDesktop    88%   (optional, skipped without a desktop)
//!     ↓
//! CleaningUp           97%
//!     ↓
//! Completed           100%
//!
//! (Any stage can transition to Failed)
//! ```

use crate::error::InstallError;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum InstallStage {
    #[default]
    NotStarted = 0,
    /// Layout planning and partition table changes
    Partitioning = 1,
    Formatting = 2,
    Mounting = 3,
    /// pacstrap into the mounted root
    InstallingBase = 4,
    GeneratingFstab = 5,
    /// In-target provisioning script
    Configuring = 6,
    InstallingBootloader = 7,
    InstallingDesktop = 8,
    /// sync and unmount
    CleaningUp = 9,
    Completed = 10,
    Failed = 255,
}

impl InstallStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Partitioning)
    }

    /// Stages a run may pass over when they have nothing to do.
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::InstallingDesktop)
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::Partitioning),
            Self::Partitioning => Some(Self::Formatting),
            Self::Formatting => Some(Self::Mounting),
            Self::Mounting => Some(Self::InstallingBase),
            Self::InstallingBase => Some(Self::GeneratingFstab),
            Self::GeneratingFstab => Some(Self::Configuring),
            Self::Configuring => Some(Self::InstallingBootloader),
            Self::InstallingBootloader => Some(Self::InstallingDesktop),
            Self::InstallingDesktop => Some(Self::CleaningUp),
            Self::CleaningUp => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Progress line reported when the stage starts.
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Partitioning => "Partitioning disk…",
            Self::Formatting => "Formatting partitions…",
            Self::Mounting => "Mounting partitions…",
            Self::InstallingBase => "Installing base system (this may take a while)…",
            Self::GeneratingFstab => "Generating fstab…",
            Self::Configuring => "Configuring system…",
            Self::InstallingBootloader => "Installing bootloader…",
            Self::InstallingDesktop => "Installing desktop environment…",
            Self::CleaningUp => "Cleaning up…",
            Self::Completed => "Installation complete!",
            Self::Failed => "Installation failed",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Partitioning => "Partitioning disk",
            Self::Formatting => "Formatting partitions",
            Self::Mounting => "Mounting partitions",
            Self::InstallingBase => "Installing base system",
            Self::GeneratingFstab => "Generating fstab",
            Self::Configuring => "Configuring system",
            Self::InstallingBootloader => "Installing bootloader",
            Self::InstallingDesktop => "Installing desktop environment",
            Self::CleaningUp => "Cleaning up",
            Self::Completed => "Installation complete",
            Self::Failed => "Installation failed",
        }
    }

    pub const fn progress_percent(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Partitioning => 5,
            Self::Formatting => 15,
            Self::Mounting => 20,
            Self::InstallingBase => 25,
            Self::GeneratingFstab => 60,
            Self::Configuring => 65,
            Self::InstallingBootloader => 85,
            Self::InstallingDesktop => 88,
            Self::CleaningUp => 97,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }

    /// The forward chain, `NotStarted` through `Completed`.
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::Partitioning,
            Self::Formatting,
            Self::Mounting,
            Self::InstallingBase,
            Self::GeneratingFstab,
            Self::Configuring,
            Self::InstallingBootloader,
            Self::InstallingDesktop,
            Self::CleaningUp,
            Self::Completed,
        ]
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    #[error("{to} cannot follow {from}; stages run in order")]
    SkippedStage {
        from: InstallStage,
        to: InstallStage,
    },

    #[error("Cannot go back from {from} to {to}")]
    BackwardTransition {
        from: InstallStage,
        to: InstallStage,
    },

    #[error("Run already ended: {from}")]
    FromTerminalState { from: InstallStage },

    #[error("{stage} modifies the disk and was not confirmed")]
    MissingConfirmation { stage: InstallStage },

    #[error("Stage entered twice: {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

impl From<InstallTransitionError> for InstallError {
    fn from(err: InstallTransitionError) -> Self {
        InstallError::state(err.to_string())
    }
}

/// Owns the current stage of one pipeline run.
///
/// ```
/// use archey::install_state::{InstallStage, StageTracker};
///
/// let mut tracker = StageTracker::new();
/// tracker.confirm_destructive_operations();
/// tracker.advance().unwrap();
/// assert_eq!(tracker.current_stage(), InstallStage::Partitioning);
///
/// // Cannot skip required stages
/// assert!(tracker.transition_to(InstallStage::Mounting).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StageTracker {
    current: InstallStage,
    failed_at: Option<InstallStage>,
    /// (stage, unix timestamp) for every stage entered
    stage_history: Vec<(InstallStage, u64)>,
    destructive_confirmed: bool,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            stage_history: Vec::with_capacity(InstallStage::all_stages().len()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<InstallStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == InstallStage::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == InstallStage::Failed
    }

    /// Percentage of the last stage entered; a failed run keeps the value it
    /// reached.
    pub fn progress_percent(&self) -> u8 {
        match self.failed_at {
            Some(stage) => stage.progress_percent(),
            None => self.current.progress_percent(),
        }
    }

    pub fn stage_history(&self) -> &[(InstallStage, u64)] {
        &self.stage_history
    }

    /// One-way: must be called before entering `Partitioning`.
    pub fn confirm_destructive_operations(&mut self) {
        self.destructive_confirmed = true;
    }

    /// Advance to the immediately following stage.
    pub fn advance(&mut self) -> Result<InstallStage, InstallTransitionError> {
        let Some(next_stage) = self.current.next() else {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        };
        self.enter(next_stage)
    }

    /// Transition to `target`, which must be the next stage. Optional stages
    /// in between are passed over.
    pub fn transition_to(
        &mut self,
        target: InstallStage,
    ) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(InstallTransitionError::AlreadyAtStage { stage: target });
        }
        if target == InstallStage::Failed {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.order() < self.current.order() {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        let mut next_stage = self.current.next();
        while let Some(stage) = next_stage
            && stage != target
            && stage.is_optional()
        {
            next_stage = stage.next();
        }
        if next_stage != Some(target) {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        self.enter(target)
    }

    /// Mark the run failed, remembering the stage it failed in.
    pub fn fail(&mut self) -> Result<(), InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }

        self.failed_at = Some(self.current);
        self.record_stage_transition(InstallStage::Failed);
        self.current = InstallStage::Failed;
        Ok(())
    }

    fn enter(&mut self, stage: InstallStage) -> Result<InstallStage, InstallTransitionError> {
        if stage.is_destructive() && !self.destructive_confirmed {
            return Err(InstallTransitionError::MissingConfirmation { stage });
        }
        self.record_stage_transition(stage);
        self.current = stage;
        Ok(stage)
    }

    fn record_stage_transition(&mut self, stage: InstallStage) {
        let entered_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since_epoch| since_epoch.as_secs());
        self.stage_history.push((stage, entered_at));
    }
}
