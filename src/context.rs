//! Shared execution context for installation steps.
//!
//! Every step receives an `InstallContext`: the command runner, the progress
//! reporter, the environment settings and the dry-run switch. Commands are
//! logged as `$ program args...` before they run; in dry-run mode mutating
//! commands and target-file writes are logged with a `[DRY RUN]` prefix and
//! skipped, while read-only probes still run for real.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::InstallerSettings;
use crate::error::{CommandError, InstallError, Result};
use crate::progress::ProgressReporter;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct InstallContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub reporter: &'a dyn ProgressReporter,
    pub settings: &'a InstallerSettings,
    pub dry_run: bool,
}

impl<'a> InstallContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        reporter: &'a dyn ProgressReporter,
        settings: &'a InstallerSettings,
    ) -> Self {
        Self {
            runner,
            reporter,
            settings,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Installer commentary, mirrored to the raw log stream.
    pub fn log(&self, message: &str) {
        info!("{}", message);
        self.reporter.log_line(message);
    }

    /// A degraded-but-continuing condition.
    pub fn warn(&self, message: &str) {
        warn!("{}", message);
        self.reporter.log_line(&format!("WARNING: {}", message));
    }

    /// Run a command and return its output whatever the exit status.
    pub fn run_unchecked(&self, spec: &CommandSpec) -> std::result::Result<CommandOutput, CommandError> {
        if self.dry_run && spec.mutating {
            self.log(&format!("[DRY RUN] Skipped: {}", spec));
            return Ok(CommandOutput::skipped());
        }

        self.log(&format!("$ {}", spec));
        let reporter = self.reporter;
        let capture = spec.capture_stdout;
        self.runner.run(spec, &mut |line| {
            if capture {
                debug!("{}", line);
            } else {
                reporter.log_line(line);
            }
        })
    }

    /// Run a command; a non-zero exit is an error.
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run_unchecked(spec)?;
        output.ensure_success(spec)?;
        Ok(output)
    }

    /// Run a read-only query and return its stdout.
    pub fn output(&self, spec: &CommandSpec) -> Result<String> {
        Ok(self.run(spec)?.stdout)
    }

    /// Run a command whose failure only degrades the result.
    /// Returns whether it succeeded.
    pub fn run_best_effort(&self, spec: &CommandSpec, what: &str) -> bool {
        match self.run(spec) {
            Ok(_) => true,
            Err(InstallError::Cancelled) => false,
            Err(e) => {
                self.warn(&format!("{} failed: {}", what, first_line(&e.to_string())));
                false
            }
        }
    }

    /// Absolute path of `relative` inside the mounted target.
    pub fn target_path(&self, relative: &str) -> PathBuf {
        self.settings.mount_root.join(relative.trim_start_matches('/'))
    }

    pub fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if self.dry_run {
            self.log(&format!("[DRY RUN] Skipped writing {}", path.display()));
            return Ok(());
        }
        debug!("Writing {}", path.display());
        fs::write(path, contents)
            .map_err(|e| InstallError::io(format!("Failed to write {}", path.display()), e))
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.dry_run {
            self.log(&format!("[DRY RUN] Skipped creating {}", path.display()));
            return Ok(());
        }
        fs::create_dir_all(path)
            .map_err(|e| InstallError::io(format!("Failed to create {}", path.display()), e))
    }

    /// Wait for udev to create device nodes after a partition table change.
    pub fn settle(&self) {
        if self.dry_run {
            return;
        }
        let delay = self.settings.settle_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingReporter, ScriptedRunner};

    #[test]
    fn test_commands_are_logged_before_running() {
        let runner = ScriptedRunner::new();
        runner.respond("wipefs", "wiped 8 bytes");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        ctx.run(&CommandSpec::new("wipefs", ["-a", "/dev/sda"])).unwrap();

        assert_eq!(
            reporter.log_lines(),
            vec!["$ wipefs -a /dev/sda".to_string(), "wiped 8 bytes".to_string()]
        );
    }

    #[test]
    fn test_dry_run_skips_mutating_commands_only() {
        let runner = ScriptedRunner::new();
        runner.respond("lsblk", "{}");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings).with_dry_run(true);

        ctx.run(&CommandSpec::new("sgdisk", ["--zap-all", "/dev/sda"])).unwrap();
        let out = ctx.output(&CommandSpec::probe("lsblk", ["-J"])).unwrap();

        assert_eq!(out, "{}");
        assert_eq!(runner.commands(), vec!["lsblk -J"]);
        assert!(reporter.log_lines()[0].starts_with("[DRY RUN] Skipped: sgdisk"));
    }

    #[test]
    fn test_failed_command_carries_tail() {
        let runner = ScriptedRunner::new();
        runner.fail("mount", 32, "mount: /mnt: wrong fs type");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        let err = ctx
            .run(&CommandSpec::new("mount", ["/dev/sda2", "/mnt"]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit 32"));
        assert!(msg.contains("wrong fs type"));
    }

    #[test]
    fn test_best_effort_warns_and_continues() {
        let runner = ScriptedRunner::new();
        runner.fail("os-prober", 1, "");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        assert!(!ctx.run_best_effort(&CommandSpec::new("os-prober", Vec::<String>::new()), "OS detection"));
        assert_eq!(reporter.warnings().len(), 1);
        assert!(reporter.warnings()[0].contains("OS detection failed"));
    }

    #[test]
    fn test_target_path_is_relative_to_mount_root() {
        let runner = ScriptedRunner::new();
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings {
            mount_root: PathBuf::from("/tmp/target"),
            ..InstallerSettings::default()
        };
        let ctx = InstallContext::new(&runner, &reporter, &settings);
        assert_eq!(ctx.target_path("/etc/fstab"), PathBuf::from("/tmp/target/etc/fstab"));
    }
}
