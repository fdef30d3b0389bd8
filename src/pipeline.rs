//! Installation pipeline orchestrator.
//!
//! Runs the fixed step sequence on one worker thread:
//!
//! partition → format → mount → pacstrap → fstab → configure → bootloader →
//! desktop (optional) → cleanup
//!
//! Progress is reported at fixed checkpoints (see [`InstallStage`]) and every
//! run ends with exactly one [`Outcome`]. The first fatal error stops the run;
//! nothing already written to disk is rolled back and the target stays
//! mounted for inspection.

use crate::bootloader;
use crate::cancel::CancellationToken;
use crate::command::CommandRunner;
use crate::config::InstallConfig;
use crate::context::InstallContext;
use crate::engine::format;
use crate::engine::{Layout, PlanRequest};
use crate::error::{InstallError, Result};
use crate::hardware;
use crate::install_state::{InstallStage, StageTracker};
use crate::logic::packages::PackageSetBuilder;
use crate::probe::DiskProbe;
use crate::progress::{Outcome, ProgressReporter};
use crate::provision;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

/// Mount roots of the pipelines currently running.
static ACTIVE_TARGETS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

fn active_targets() -> &'static Mutex<HashSet<PathBuf>> {
    ACTIVE_TARGETS.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claims a mount root for the lifetime of one run.
struct RunGuard {
    target: PathBuf,
}

impl RunGuard {
    fn acquire(target: &Path) -> Result<Self> {
        let mut active = active_targets()
            .lock()
            .map_err(|_| InstallError::state("pipeline registry poisoned"))?;
        if !active.insert(target.to_path_buf()) {
            return Err(InstallError::AlreadyRunning);
        }
        Ok(Self {
            target: target.to_path_buf(),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = active_targets().lock() {
            active.remove(&self.target);
        }
    }
}

/// Probe the configured disk and compute its layout. Read-only.
pub fn plan_layout(ctx: &InstallContext<'_>, config: &InstallConfig) -> Result<Layout> {
    let disk = DiskProbe::new(ctx.runner, ctx.settings.probe_timeout()).disk(config.disk_name())?;
    let request = PlanRequest::from_config(config, &disk)?;
    Layout::plan(ctx, &request)
}

/// One installation run.
///
/// ```no_run
/// use archey::config::InstallConfig;
/// use archey::command::SystemRunner;
/// use archey::pipeline::InstallPipeline;
/// use archey::progress::TracingReporter;
/// use std::sync::Arc;
///
/// let config = InstallConfig::load_from_file("install.json").unwrap();
/// let outcome = InstallPipeline::new(config, Arc::new(SystemRunner::default()), Arc::new(TracingReporter))
///     .confirm_destructive()
///     .run();
/// assert!(outcome.is_success());
/// ```
pub struct InstallPipeline {
    config: InstallConfig,
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    dry_run: bool,
    confirmed: bool,
}

impl InstallPipeline {
    pub fn new(
        config: InstallConfig,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            runner,
            reporter,
            cancel: CancellationToken::new(),
            dry_run: false,
            confirmed: false,
        }
    }

    /// Share a token with the caller (and with the runner, so in-flight
    /// commands are killed too).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Authorize the destructive partitioning stage.
    pub fn confirm_destructive(mut self) -> Self {
        self.confirmed = true;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run on a named background thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<Outcome>> {
        thread::Builder::new()
            .name("archey-install".into())
            .spawn(move || self.run())
    }

    /// Run to completion on the current thread. Reports exactly one outcome.
    pub fn run(&self) -> Outcome {
        let mut tracker = StageTracker::new();
        if self.confirmed || self.dry_run {
            tracker.confirm_destructive_operations();
        }

        let result = RunGuard::acquire(&self.config.settings.mount_root)
            .and_then(|_guard| self.execute(&mut tracker));

        let outcome = match result {
            Ok(()) => Outcome::Succeeded,
            Err(e) if e.is_cancelled() => {
                warn!("Installation cancelled during {}", tracker.current_stage());
                Outcome::Cancelled
            }
            Err(e) => {
                error!("Installation failed during {}: {}", tracker.current_stage(), e);
                Outcome::Failed(e.to_string())
            }
        };
        if !outcome.is_success() {
            let _ = tracker.fail();
        }

        self.reporter.finished(&outcome);
        outcome
    }

    fn execute(&self, tracker: &mut StageTracker) -> Result<()> {
        let config = &self.config;
        let ctx = InstallContext::new(self.runner.as_ref(), self.reporter.as_ref(), &config.settings)
            .with_dry_run(self.dry_run);

        if self.dry_run {
            ctx.log("[DRY RUN] No changes will be made to disk");
        }
        if !hardware::detect_firmware_mode().is_uefi() {
            ctx.warn("System is not booted in UEFI mode; the installed GRUB targets x86_64-efi");
        }

        self.enter(&ctx, tracker, InstallStage::Partitioning)?;
        let layout = plan_layout(&ctx, config)?;
        ctx.log(&format!("Layout: {}", layout));
        let plan = layout.apply(&ctx)?;
        ctx.log(&format!(
            "EFI partition: {}, root partition: {}",
            plan.efi_partition, plan.root_partition
        ));

        self.enter(&ctx, tracker, InstallStage::Formatting)?;
        format::format_partitions(&ctx, &plan)?;

        self.enter(&ctx, tracker, InstallStage::Mounting)?;
        format::mount_target(&ctx, &plan)?;

        self.enter(&ctx, tracker, InstallStage::InstallingBase)?;
        let packages = PackageSetBuilder::from_config(config).build();
        provision::install_base_system(&ctx, &packages)?;

        self.enter(&ctx, tracker, InstallStage::GeneratingFstab)?;
        format::generate_fstab(&ctx)?;

        self.enter(&ctx, tracker, InstallStage::Configuring)?;
        provision::configure_target(&ctx, config)?;

        self.enter(&ctx, tracker, InstallStage::InstallingBootloader)?;
        bootloader::install_bootloader(&ctx, config.mode)?;

        if let Some(desktop) = config.desktop_to_install() {
            self.check_cancelled()?;
            tracker.transition_to(InstallStage::InstallingDesktop)?;
            self.report(&ctx, &format!("Installing {}…", desktop.name), InstallStage::InstallingDesktop);
            provision::install_desktop(&ctx, desktop)?;
        }

        self.enter(&ctx, tracker, InstallStage::CleaningUp)?;
        format::unmount_target(&ctx);

        tracker.transition_to(InstallStage::Completed)?;
        self.report(&ctx, InstallStage::Completed.message(), InstallStage::Completed);
        info!("Installation of {} finished", config.disk_path());
        Ok(())
    }

    fn enter(&self, ctx: &InstallContext<'_>, tracker: &mut StageTracker, stage: InstallStage) -> Result<()> {
        self.check_cancelled()?;
        tracker.transition_to(stage)?;
        self.report(ctx, stage.message(), stage);
        Ok(())
    }

    fn report(&self, ctx: &InstallContext<'_>, message: &str, stage: InstallStage) {
        let percent = stage.progress_percent();
        ctx.reporter.progress(message, percent);
        ctx.reporter.log_line(&format!("[{}%] {}", percent, message));
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        Ok(())
    }
}
