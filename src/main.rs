//! Archey - Main entry point

use anyhow::{Context, bail};
use archey::cli::{Cli, Commands};
use archey::config::{InstallConfig, InstallerSettings};
use archey::context::InstallContext;
use archey::probe::DiskProbe;
use archey::process_guard::{self, ProcessGuard};
use archey::progress::TracingReporter;
use archey::{
    CancellationToken, InstallPipeline, Outcome, SystemRunner, hardware, pipeline, units,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// RUST_LOG overrides the level picked by `--verbose`.
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    match cli.command {
        Commands::Probe { json } => probe(json),
        Commands::Validate { config } => {
            let config = load_config(&config)?;
            info!("Configuration validation successful");
            println!("✓ Configuration is valid: {} install on {}", config.mode, config.disk_path());
            Ok(())
        }
        Commands::Plan { config } => plan(&config),
        Commands::Install {
            config,
            dry_run,
            yes,
        } => install(&config, dry_run, yes),
    }
}

fn load_config(path: &Path) -> anyhow::Result<InstallConfig> {
    info!("Loading configuration file: {}", path.display());
    let config = InstallConfig::load_from_file(path)?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

fn probe(json: bool) -> anyhow::Result<()> {
    let runner = SystemRunner::default();
    let timeout = InstallerSettings::default().probe_timeout();
    let disks = DiskProbe::new(&runner, timeout).disks()?;
    let hw = hardware::HardwareInfo::detect(&runner);

    if json {
        let disks: Vec<_> = disks
            .iter()
            .map(|disk| {
                let class = disk.classify();
                serde_json::json!({
                    "disk": disk,
                    "efi_partition": class.efi.map(|p| p.path()),
                    "windows_partition": class.windows.map(|p| p.path()),
                    "free_bytes": class.free_bytes,
                })
            })
            .collect();
        let (cpu_packages, gpu_packages) = hw.suggested_packages();
        let report = serde_json::json!({
            "firmware": hw.firmware.to_string(),
            "cpu": hw.cpu.to_string(),
            "gpu": hw.gpu.to_string(),
            "cpu_packages": cpu_packages,
            "gpu_packages": gpu_packages,
            "disks": disks,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (cpu_packages, gpu_packages) = hw.suggested_packages();
    println!("Firmware: {}   CPU: {}   GPU: {}", hw.firmware, hw.cpu, hw.gpu);
    println!(
        "Suggested packages: {}",
        cpu_packages.iter().chain(gpu_packages).copied().collect::<Vec<_>>().join(" ")
    );
    for disk in &disks {
        let class = disk.classify();
        println!(
            "{}  {}  {}  (free {})",
            disk.path(),
            units::human_bytes(disk.size),
            disk.model,
            units::human_bytes(class.free_bytes)
        );
        for part in &disk.partitions {
            let mut tags = Vec::new();
            if class.efi.is_some_and(|p| p.name == part.name) {
                tags.push("EFI");
            }
            if class.windows.is_some_and(|p| p.name == part.name) {
                tags.push("Windows");
            }
            println!(
                "  {:<16} {:>10}  {:<8} {:<16} {}",
                part.path(),
                units::human_bytes(part.size),
                part.fstype,
                part.label,
                tags.join(",")
            );
        }
    }
    Ok(())
}

fn plan(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let runner = SystemRunner::default();
    let reporter = TracingReporter;
    let ctx = InstallContext::new(&runner, &reporter, &config.settings).with_dry_run(true);

    let layout = pipeline::plan_layout(&ctx, &config)?;
    let preview = layout.preview();
    println!("{}", layout);
    println!("  EFI:  {}", preview.efi_partition);
    println!("  Root: {}", preview.root_partition);
    println!("Commands:");
    for spec in layout.commands() {
        println!("  {}", spec);
    }
    Ok(())
}

fn install(path: &Path, dry_run: bool, yes: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    if !dry_run && !yes {
        bail!(
            "Installing modifies {}; re-run with --yes to confirm or --dry-run to preview",
            config.disk_path()
        );
    }

    // Terminates any registered children if we unwind out of main
    let guard = ProcessGuard::new();
    let cancel = CancellationToken::new();
    if let Err(e) = process_guard::init_signal_handlers(cancel.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let mut pipeline = InstallPipeline::new(
        config,
        Arc::new(SystemRunner::new(cancel.clone())),
        Arc::new(TracingReporter),
    )
    .with_cancellation(cancel)
    .dry_run(dry_run);
    if yes {
        pipeline = pipeline.confirm_destructive();
    }

    let handle = pipeline.spawn().context("Failed to start installer thread")?;
    let outcome = handle
        .join()
        .map_err(|_| anyhow::anyhow!("Installer thread panicked"))?;

    let leftover = guard.child_count();
    if leftover > 0 {
        warn!("{} tool(s) still running after the installer finished; stopping them", leftover);
    }

    match outcome {
        Outcome::Succeeded => Ok(()),
        Outcome::Cancelled => bail!("Installation cancelled"),
        Outcome::Failed(msg) => bail!("Installation failed: {}", msg),
    }
}
