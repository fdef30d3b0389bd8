//! System provisioning: base extraction, in-target configuration, desktop.

use crate::chroot_script::{ChrootScript, SCRIPT_PATH};
use crate::command::CommandSpec;
use crate::config::{DesktopEnvironment, InstallConfig};
use crate::context::InstallContext;
use crate::error::{InstallError, Result};
use crate::logic::packages::PackageSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MULTILIB_DISABLED: &str = "#[multilib]\n#Include";
const MULTILIB_ENABLED: &str = "[multilib]\nInclude";

/// Uncomment the `[multilib]` section. `None` when it is not commented out.
pub fn uncomment_multilib(conf: &str) -> Option<String> {
    conf.contains(MULTILIB_DISABLED)
        .then(|| conf.replacen(MULTILIB_DISABLED, MULTILIB_ENABLED, 1))
}

/// Enable multilib on the live system and refresh the databases.
/// Failure is a warning: pacstrap reports the missing packages itself.
pub fn enable_live_multilib(ctx: &InstallContext<'_>) {
    let path = &ctx.settings.pacman_conf;
    let conf = match fs::read_to_string(path) {
        Ok(conf) => conf,
        Err(e) => {
            ctx.warn(&format!("Could not read {}: {}", path.display(), e));
            return;
        }
    };

    let Some(updated) = uncomment_multilib(&conf) else {
        debug!("multilib already enabled in {}", path.display());
        return;
    };

    if let Err(e) = ctx.write_file(path, &updated) {
        ctx.warn(&format!("Could not enable multilib: {}", e));
        return;
    }
    if ctx.run_best_effort(&CommandSpec::new("pacman", ["-Sy", "--noconfirm"]), "Refreshing package databases") {
        ctx.log("Multilib enabled on live system");
    }
}

/// `pacstrap <root> <packages...>`
pub fn install_base_system(ctx: &InstallContext<'_>, packages: &PackageSet) -> Result<()> {
    ctx.log(&format!("Running pacstrap with {} packages", packages.len()));
    if packages.needs_multilib() {
        enable_live_multilib(ctx);
    }

    let mut args = vec![ctx.settings.mount_root.display().to_string()];
    args.extend(packages.as_slice().iter().cloned());
    ctx.run(&CommandSpec::new("pacstrap", args))?;
    Ok(())
}

/// Removes the provisioning script when dropped, success or not.
struct ScriptFile {
    path: PathBuf,
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

fn write_script(path: &Path, contents: &str) -> Result<ScriptFile> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let io_err = |e| InstallError::io(format!("Failed to write {}", path.display()), e);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o700)
        .open(path)
        .map_err(io_err)?;
    let guard = ScriptFile {
        path: path.to_path_buf(),
    };
    file.write_all(contents.as_bytes()).map_err(io_err)?;
    Ok(guard)
}

/// Render the configuration script, run it in the target and delete it.
pub fn configure_target(ctx: &InstallContext<'_>, config: &InstallConfig) -> Result<()> {
    let script = ChrootScript::render(config);
    let host_path = ctx.target_path(SCRIPT_PATH);
    let in_target = format!("/{}", SCRIPT_PATH);
    let spec = CommandSpec::chroot(&ctx.settings.mount_root, in_target, Vec::<String>::new());

    if ctx.dry_run {
        ctx.log(&format!("[DRY RUN] Skipped writing {}", host_path.display()));
        ctx.run(&spec)?;
        return Ok(());
    }

    if let Some(parent) = host_path.parent() {
        ctx.create_dir_all(parent)?;
    }
    let _script = write_script(&host_path, script.as_str())?;
    ctx.log("Running chroot configuration script");
    ctx.run(&spec)?;
    Ok(())
}

/// Install the desktop packages, then enable the display manager.
pub fn install_desktop(ctx: &InstallContext<'_>, desktop: &DesktopEnvironment) -> Result<()> {
    let root = &ctx.settings.mount_root;
    let mut args = vec!["-S".to_string(), "--noconfirm".to_string()];
    args.extend(desktop.packages.iter().cloned());
    ctx.run(&CommandSpec::chroot(root, "pacman", args))?;

    if let Some(dm) = desktop.display_manager.as_deref().filter(|d| !d.trim().is_empty()) {
        ctx.run_best_effort(
            &CommandSpec::chroot(root, "systemctl", ["enable", dm.trim()]),
            &format!("Enabling display manager {}", dm),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallerSettings;
    use crate::testing::{RecordingReporter, ScriptedRunner};

    const PACMAN_CONF: &str = "[core]\nInclude = /etc/pacman.d/mirrorlist\n\n#[multilib]\n#Include = /etc/pacman.d/mirrorlist\n";

    #[test]
    fn test_uncomment_multilib() {
        let updated = uncomment_multilib(PACMAN_CONF).unwrap();
        assert!(updated.contains("\n[multilib]\nInclude = /etc/pacman.d/mirrorlist"));
        assert!(uncomment_multilib(&updated).is_none());
    }

    #[test]
    fn test_live_multilib_enabled_when_lib32_requested() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("pacman.conf");
        fs::write(&conf, PACMAN_CONF).unwrap();
        let settings = InstallerSettings {
            pacman_conf: conf.clone(),
            ..InstallerSettings::default()
        };
        let runner = ScriptedRunner::new();
        let reporter = RecordingReporter::new();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        let mut packages = PackageSet::new();
        packages.extend(["base", "lib32-mesa"]);
        install_base_system(&ctx, &packages).unwrap();

        assert!(fs::read_to_string(&conf).unwrap().contains("\n[multilib]\nInclude"));
        assert_eq!(
            runner.commands(),
            vec!["pacman -Sy --noconfirm", "pacstrap /mnt base lib32-mesa"]
        );
    }

    #[test]
    fn test_multilib_failure_is_not_fatal() {
        let settings = InstallerSettings {
            pacman_conf: PathBuf::from("/nonexistent/pacman.conf"),
            ..InstallerSettings::default()
        };
        let runner = ScriptedRunner::new();
        let reporter = RecordingReporter::new();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        let mut packages = PackageSet::new();
        packages.extend(["lib32-mesa"]);
        install_base_system(&ctx, &packages).unwrap();
        assert_eq!(reporter.warnings().len(), 1);
        assert!(runner.ran("pacstrap"));
    }

    #[test]
    fn test_configure_target_removes_script_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = InstallerSettings {
            mount_root: dir.path().to_path_buf(),
            ..InstallerSettings::default()
        };
        let runner = ScriptedRunner::new();
        runner.fail("arch-chroot", 1, "useradd: invalid user name");
        let reporter = RecordingReporter::new();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        let config: InstallConfig = serde_json::from_str(
            r#"{"disk":"sda","mode":"wipe","timezone":"UTC","locale":"C.UTF-8","keymap":"us",
                "hostname":"h","username":"bad user","password":"pw"}"#,
        )
        .unwrap();

        let err = configure_target(&ctx, &config).unwrap_err();
        assert!(err.to_string().contains("invalid user name"));
        assert!(!dir.path().join(SCRIPT_PATH).exists());
        assert_eq!(
            runner.commands(),
            vec![format!("arch-chroot {} /root/archey-setup.sh", dir.path().display())]
        );
        assert!(reporter.log_lines().iter().all(|l| !l.contains("pw'")));
    }

    #[test]
    fn test_display_manager_enabled_after_packages() {
        let runner = ScriptedRunner::new();
        runner.fail("arch-chroot /mnt systemctl", 1, "Unit sddm.service not found");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        let de = DesktopEnvironment {
            name: "KDE Plasma".into(),
            packages: vec!["plasma-meta".into(), "sddm".into()],
            display_manager: Some("sddm".into()),
        };
        install_desktop(&ctx, &de).unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                "arch-chroot /mnt pacman -S --noconfirm plasma-meta sddm",
                "arch-chroot /mnt systemctl enable sddm",
            ]
        );
        assert_eq!(reporter.warnings().len(), 1);
    }
}
