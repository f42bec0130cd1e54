//! zfsstrap - entry point.
//!
//! Parses the command line, sets up logging and signal handling, checks
//! privileges, and dispatches to the pipeline.

use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use zfsstrap::cli::{Cli, Commands};
use zfsstrap::mirror::{self, MirrorCandidate};
use zfsstrap::pipeline::{self, PipelineOptions};
use zfsstrap::plan::InstallPlan;
use zfsstrap::storage::plan_provisioning;
use zfsstrap::{process_guard, runner, topology};

fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logger();

    // Terminate child tools (sgdisk, cryptsetup, zpool) if we die first
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = Cli::parse_args();
    if cli.dry_run {
        runner::enable_dry_run();
        info!("dry-run mode: no destructive operation will execute");
    }
    debug!("CLI arguments parsed");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Install {
            config,
            mirrors,
            variant,
            template,
            reboot,
        } => {
            require_root()?;
            let plan = InstallPlan::load_from_file(&config)?;
            let options = PipelineOptions {
                mirrors: mirror_list(&mirrors),
                variant,
                template,
                reboot,
                ..Default::default()
            };
            pipeline::run_install(&plan, &options)?;
        }
        Commands::Validate { config } => {
            let plan = InstallPlan::load_from_file(&config)?;
            plan.validate()?;
            println!("plan is valid: {}", config.display());
        }
        Commands::Plan { config } => {
            let plan = InstallPlan::load_from_file(&config)?;
            plan.validate()?;
            let topology = topology::resolve(&plan.device, plan.swap_strategy)?;
            let pplan = plan_provisioning(&topology, &plan);
            println!("{}", pplan.summary());
        }
        Commands::Resolve { mirrors, variant } => {
            let url = mirror::resolve_artifact(&mirror_list(&mirrors), &variant)?;
            println!("{}", url);
        }
    }
    Ok(())
}

fn mirror_list(mirrors: &[String]) -> Vec<MirrorCandidate> {
    if mirrors.is_empty() {
        mirror::default_mirrors()
    } else {
        mirrors
            .iter()
            .map(|url| MirrorCandidate::new(url.as_str()))
            .collect()
    }
}

/// Installation partitions disks and imports pools; require root unless
/// previewing.
fn require_root() -> anyhow::Result<()> {
    if runner::is_dry_run() {
        return Ok(());
    }
    if !nix::unistd::Uid::effective().is_root() {
        anyhow::bail!("installation must run as root (use --dry-run to preview)");
    }
    Ok(())
}
