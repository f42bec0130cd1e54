use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// zfsstrap - unattended ZFS-on-root installer
#[derive(Parser)]
#[command(name = "zfsstrap")]
#[command(about = "Unattended Arch Linux installer targeting ZFS on root")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// In this mode, destructive operations (partitioning, formatting,
    /// pool creation, chroot execution) are skipped and logged. Read-only
    /// probes still execute so the preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full unattended installation
    Install {
        /// Path to the JSON install plan
        config: PathBuf,

        /// Mirror base URL; repeat to supply a priority-ordered list
        #[arg(long = "mirror")]
        mirrors: Vec<String>,

        /// Architecture variant of the bootstrap archive
        #[arg(long, default_value = "x86_64")]
        variant: String,

        /// Replacement for the built-in setup script template
        #[arg(long)]
        template: Option<PathBuf>,

        /// Reboot into the installed system when done
        #[arg(long)]
        reboot: bool,
    },
    /// Validate an install plan without touching anything
    Validate {
        /// Path to the JSON install plan
        config: PathBuf,
    },
    /// Print the storage provisioning plan for an install plan
    Plan {
        /// Path to the JSON install plan
        config: PathBuf,
    },
    /// Resolve the current bootstrap archive URL and exit
    Resolve {
        /// Mirror base URL; repeat to supply a priority-ordered list
        #[arg(long = "mirror")]
        mirrors: Vec<String>,

        /// Architecture variant of the bootstrap archive
        #[arg(long, default_value = "x86_64")]
        variant: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
