//! GRUB installation, theming and firmware boot order.
//!
//! # Sequence
//!
//! | Step | Failure |
//! |------|---------|
//! | grub-install (with removable fallback path) | fatal |
//! | theme copy | warning |
//! | PF2 font generation | warning |
//! | /etc/default/grub rewrite | fatal |
//! | os-prober (dualboot only) | warning |
//! | grub-mkconfig | fatal |
//! | boot order prioritization | warning |
//!
//! The defaults rewrite must precede `grub-mkconfig`, which reads it.

use crate::command::CommandSpec;
use crate::context::InstallContext;
use crate::error::{InstallError, Result};
use crate::logic::boot_order::{self, BootOrderChange};
use crate::parsers::efibootmgr;
use crate::types::InstallMode;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Theme directory inside the target, relative to its root.
pub const THEME_DIR: &str = "boot/grub/themes/archey";

const THEME_DESCRIPTOR: &str = "theme.txt";

/// Packaging leftovers never copied into the target.
const THEME_SKIP: &[&str] = &["install_theme.sh"];

const FC_MATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings stripped from /etc/default/grub before the canonical ones are appended.
const MANAGED_KEYS: &[&str] = &[
    "GRUB_THEME=",
    "GRUB_BACKGROUND=",
    "GRUB_GFXMODE=",
    "GRUB_GFXPAYLOAD_LINUX=",
    "GRUB_DISABLE_OS_PROBER=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Regular,
    Bold,
}

/// One PF2 rasterization referenced by the theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontSpec {
    pub size: u32,
    pub style: FontStyle,
    pub name: &'static str,
    pub file: &'static str,
}

pub const THEME_FONTS: &[FontSpec] = &[
    FontSpec { size: 11, style: FontStyle::Regular, name: "Archey 11", file: "archey-11.pf2" },
    FontSpec { size: 12, style: FontStyle::Regular, name: "Archey 12", file: "archey-12.pf2" },
    FontSpec { size: 13, style: FontStyle::Regular, name: "Archey 13", file: "archey-13.pf2" },
    FontSpec { size: 14, style: FontStyle::Regular, name: "Archey 14", file: "archey-14.pf2" },
    FontSpec { size: 16, style: FontStyle::Regular, name: "Archey Regular 16", file: "archey-reg-16.pf2" },
    FontSpec { size: 16, style: FontStyle::Bold, name: "Archey Bold 16", file: "archey-bold-16.pf2" },
    FontSpec { size: 24, style: FontStyle::Bold, name: "Archey Bold 24", file: "archey-bold-24.pf2" },
];

/// Run the whole bootloader sequence.
pub fn install_bootloader(ctx: &InstallContext<'_>, mode: InstallMode) -> Result<()> {
    ctx.log("Installing GRUB bootloader");
    grub_install(ctx)?;

    if install_theme(ctx) {
        generate_fonts(ctx);
    }

    configure_grub_defaults(ctx)?;

    if mode.probes_foreign_os() {
        ctx.run_best_effort(
            &CommandSpec::chroot(&ctx.settings.mount_root, "os-prober", Vec::<String>::new()),
            "OS detection",
        );
    }

    ctx.run(&CommandSpec::chroot(
        &ctx.settings.mount_root,
        "grub-mkconfig",
        ["-o", "/boot/grub/grub.cfg"],
    ))?;

    prioritize_boot_entry(ctx);
    ctx.log("GRUB installed and configured");
    Ok(())
}

/// Install to the ESP, also writing the removable-media fallback loader.
pub fn grub_install(ctx: &InstallContext<'_>) -> Result<()> {
    let bootloader_id = format!("--bootloader-id={}", ctx.settings.bootloader_id);
    ctx.run(&CommandSpec::chroot(
        &ctx.settings.mount_root,
        "grub-install",
        [
            "--target=x86_64-efi",
            "--efi-directory=/boot/efi",
            bootloader_id.as_str(),
            "--recheck",
            "--removable",
        ],
    ))?;
    Ok(())
}

/// Copy the theme into the target. Returns whether a theme is in place.
pub fn install_theme(ctx: &InstallContext<'_>) -> bool {
    let source = &ctx.settings.theme_source;
    if !source.is_dir() {
        ctx.warn(&format!(
            "Theme source not found at {}; using default GRUB theme",
            source.display()
        ));
        return false;
    }

    let source = match theme_root(source) {
        Ok(root) => root,
        Err(e) => {
            ctx.warn(&format!("Could not read theme source: {}", e));
            return false;
        }
    };
    let dest = ctx.target_path(THEME_DIR);

    if ctx.dry_run {
        ctx.log(&format!(
            "[DRY RUN] Skipped copying theme {} -> {}",
            source.display(),
            dest.display()
        ));
        return true;
    }

    ctx.log(&format!("Copying GRUB theme from {}", source.display()));
    match replace_dir(&source, &dest) {
        Ok(()) => true,
        Err(e) => {
            ctx.warn(&format!("Theme copy failed: {}", e));
            false
        }
    }
}

/// With no theme.txt and exactly one subdirectory, the theme is one level down.
fn theme_root(source: &Path) -> io::Result<PathBuf> {
    if source.join(THEME_DESCRIPTOR).exists() {
        return Ok(source.to_path_buf());
    }

    let mut subdirs = Vec::new();
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    match subdirs.as_slice() {
        [only] => {
            debug!("Detected nested theme folder {}", only.display());
            Ok(only.clone())
        }
        _ => Ok(source.to_path_buf()),
    }
}

fn replace_dir(source: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let name = entry.file_name();
        if THEME_SKIP.iter().any(|skip| name == *skip) {
            continue;
        }
        let target = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn locate_font(ctx: &InstallContext<'_>, style: &str) -> Option<PathBuf> {
    let pattern = format!("DejaVu Sans Mono:style={}", style);
    let spec = CommandSpec::probe("fc-match", [pattern.as_str(), "--format=%{file}"])
        .with_timeout(FC_MATCH_TIMEOUT);
    let path = ctx.output(&spec).ok()?;
    let path = PathBuf::from(path.trim());
    (!path.as_os_str().is_empty() && path.exists()).then_some(path)
}

/// Rasterize the theme fonts with the live system's `grub-mkfont`.
/// Bold falls back to regular; no regular source skips generation.
pub fn generate_fonts(ctx: &InstallContext<'_>) {
    let Some(regular) = locate_font(ctx, "Book") else {
        ctx.warn("Could not find a source font; skipping PF2 generation");
        return;
    };
    let bold = locate_font(ctx, "Bold").unwrap_or_else(|| regular.clone());

    let dest = ctx.target_path(THEME_DIR);
    for font in THEME_FONTS {
        let source = match font.style {
            FontStyle::Regular => &regular,
            FontStyle::Bold => &bold,
        };
        let spec = CommandSpec::new(
            "grub-mkfont",
            [
                "-s".to_string(),
                font.size.to_string(),
                "-n".into(),
                font.name.into(),
                "-o".into(),
                dest.join(font.file).display().to_string(),
                source.display().to_string(),
            ],
        );
        ctx.run_best_effort(&spec, &format!("Generating {}", font.file));
    }
    ctx.log("Fonts generated");
}

/// Drop managed settings and append the canonical values.
pub fn rewrite_grub_defaults(current: &str, theme_path: &str) -> String {
    let mut lines: Vec<String> = current
        .lines()
        .filter(|line| !MANAGED_KEYS.iter().any(|key| line.starts_with(key)))
        .map(str::to_string)
        .collect();

    lines.push(String::new());
    lines.push(format!("GRUB_THEME=\"{}\"", theme_path));
    lines.push("GRUB_GFXMODE=\"auto\"".into());
    lines.push("GRUB_GFXPAYLOAD_LINUX=\"keep\"".into());
    lines.push("GRUB_DISABLE_OS_PROBER=false".into());

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

pub fn configure_grub_defaults(ctx: &InstallContext<'_>) -> Result<()> {
    let path = ctx.target_path("etc/default/grub");
    if ctx.dry_run {
        ctx.log(&format!("[DRY RUN] Skipped rewriting {}", path.display()));
        return Ok(());
    }

    let current = fs::read_to_string(&path)
        .map_err(|e| InstallError::io(format!("Failed to read {}", path.display()), e))?;
    let theme = format!("/{}/{}", THEME_DIR, THEME_DESCRIPTOR);
    ctx.write_file(&path, &rewrite_grub_defaults(&current, &theme))?;
    ctx.log("GRUB config updated");
    Ok(())
}

/// Move the new boot entry to the front of BootOrder. Never fails the install.
pub fn prioritize_boot_entry(ctx: &InstallContext<'_>) {
    let root = &ctx.settings.mount_root;
    let query = CommandSpec::chroot(root, "efibootmgr", Vec::<String>::new()).capturing();

    let output = match ctx.run(&query) {
        Ok(output) => output.stdout,
        Err(e) => {
            ctx.warn(&format!("Could not read EFI boot entries: {}", e));
            return;
        }
    };
    if ctx.dry_run {
        return;
    }

    let state = match efibootmgr::parse(&output) {
        Ok(state) => state,
        Err(e) => {
            ctx.warn(&format!("Skipping boot prioritization: {}", e));
            return;
        }
    };

    match boot_order::prioritize(&state, &ctx.settings.product_name) {
        BootOrderChange::NoMatchingEntry => {
            ctx.warn("No Archey/Arch EFI entry found to prioritize");
        }
        BootOrderChange::AlreadyFirst(id) => {
            ctx.log(&format!("Boot entry {} is already first", id));
        }
        BootOrderChange::Reordered(order) => {
            let order = order.join(",");
            let write = CommandSpec::chroot(root, "efibootmgr", ["-o", order.as_str()]);
            if ctx.run_best_effort(&write, "Updating EFI BootOrder") {
                ctx.log(&format!("Set EFI BootOrder: {}", order));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallerSettings;
    use crate::testing::{RecordingReporter, ScriptedRunner};

    #[test]
    fn test_rewrite_grub_defaults() {
        let current = "GRUB_DEFAULT=0\nGRUB_TIMEOUT=5\nGRUB_GFXMODE=1024x768\n#GRUB_THEME=\"/path/to/gfxtheme\"\nGRUB_DISABLE_OS_PROBER=true\n";
        let updated = rewrite_grub_defaults(current, "/boot/grub/themes/archey/theme.txt");

        assert!(updated.contains("GRUB_DEFAULT=0\nGRUB_TIMEOUT=5\n"));
        assert!(!updated.contains("1024x768"));
        assert!(!updated.contains("GRUB_DISABLE_OS_PROBER=true"));
        assert!(updated.contains("#GRUB_THEME"));
        assert!(updated.ends_with(
            "\nGRUB_THEME=\"/boot/grub/themes/archey/theme.txt\"\nGRUB_GFXMODE=\"auto\"\nGRUB_GFXPAYLOAD_LINUX=\"keep\"\nGRUB_DISABLE_OS_PROBER=false\n"
        ));
        assert_eq!(rewrite_grub_defaults(&updated, "/x").matches("GRUB_GFXMODE=").count(), 1);
    }

    #[test]
    fn test_theme_copy_flattens_and_skips_scripts() {
        let src = tempfile::tempdir().unwrap();
        let nested = src.path().join("archey-theme");
        fs::create_dir_all(nested.join("icons")).unwrap();
        fs::write(nested.join("theme.txt"), "title-text: \"\"").unwrap();
        fs::write(nested.join("icons/arch.png"), "png").unwrap();
        fs::write(nested.join("install_theme.sh"), "#!/bin/sh").unwrap();

        let target = tempfile::tempdir().unwrap();
        let stale = target.path().join(THEME_DIR);
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("old.txt"), "stale").unwrap();

        let settings = InstallerSettings {
            mount_root: target.path().to_path_buf(),
            theme_source: src.path().to_path_buf(),
            ..InstallerSettings::default()
        };
        let runner = ScriptedRunner::new();
        let reporter = RecordingReporter::new();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        assert!(install_theme(&ctx));
        let dest = target.path().join(THEME_DIR);
        assert!(dest.join("theme.txt").exists());
        assert!(dest.join("icons/arch.png").exists());
        assert!(!dest.join("install_theme.sh").exists());
        assert!(!dest.join("old.txt").exists());
    }

    #[test]
    fn test_missing_theme_is_a_warning() {
        let settings = InstallerSettings {
            theme_source: PathBuf::from("/nonexistent/archey-grub"),
            ..InstallerSettings::default()
        };
        let runner = ScriptedRunner::new();
        let reporter = RecordingReporter::new();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        assert!(!install_theme(&ctx));
        assert_eq!(reporter.warnings().len(), 1);
    }

    #[test]
    fn test_bold_falls_back_to_regular() {
        let fonts = tempfile::tempdir().unwrap();
        let regular = fonts.path().join("DejaVuSansMono.ttf");
        fs::write(&regular, "ttf").unwrap();

        let runner = ScriptedRunner::new();
        runner
            .respond("fc-match 'DejaVu Sans Mono:style=Book'", &regular.display().to_string())
            .respond("fc-match 'DejaVu Sans Mono:style=Bold'", "/nonexistent/Bold.ttf");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        generate_fonts(&ctx);

        let mkfont: Vec<String> = runner
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("grub-mkfont"))
            .collect();
        assert_eq!(mkfont.len(), THEME_FONTS.len());
        assert!(mkfont.iter().all(|c| c.ends_with(&regular.display().to_string())));
        assert!(mkfont[6].contains("-s 24 -n 'Archey Bold 24'"));
    }

    #[test]
    fn test_no_font_source_skips_generation() {
        let runner = ScriptedRunner::new();
        runner.missing("fc-match");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        generate_fonts(&ctx);
        assert!(!runner.ran("grub-mkfont"));
        assert_eq!(reporter.warnings().len(), 1);
    }

    #[test]
    fn test_boot_entry_moved_to_front() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "arch-chroot /mnt efibootmgr",
            "BootCurrent: 0001\nBootOrder: 0001,0002,0003\nBoot0001* Windows Boot Manager\nBoot0002* Archey\nBoot0003* UEFI Shell\n",
        );
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        prioritize_boot_entry(&ctx);
        assert!(runner.ran("arch-chroot /mnt efibootmgr -o 0002,0001,0003"));
        assert!(reporter.warnings().is_empty());
    }

    #[test]
    fn test_missing_efibootmgr_only_warns() {
        let runner = ScriptedRunner::new();
        runner.missing("arch-chroot /mnt efibootmgr");
        let reporter = RecordingReporter::new();
        let settings = InstallerSettings::default();
        let ctx = InstallContext::new(&runner, &reporter, &settings);

        prioritize_boot_entry(&ctx);
        assert_eq!(reporter.warnings().len(), 1);
        assert_eq!(runner.calls().len(), 1);
    }
}
