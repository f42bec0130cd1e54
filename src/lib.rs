//! zfsstrap library
//!
//! Core functionality for the unattended ZFS-on-root installer: plan
//! loading and validation, partition topology, storage provisioning,
//! bootstrap archive resolution and acquisition, setup script rendering,
//! and the coordinating pipeline.

pub mod acquire;
pub mod cli;
pub mod error;
pub mod mirror;
pub mod pipeline;
pub mod plan;
pub mod process_guard;
pub mod provision;
pub mod render;
pub mod runner;
pub mod storage;
pub mod topology;

// Re-export main types for convenience
pub use error::{InstallError, Result};
pub use mirror::{default_mirrors, resolve_artifact, MirrorCandidate};
pub use pipeline::{run_install, PipelineOptions};
pub use plan::{Credentials, InitSystem, InstallPlan, Secret, SwapStrategy, VideoDriver};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use runner::{enable_dry_run, is_dry_run, ToolOutput};
pub use storage::{plan_provisioning, ProvisionPlan, ProvisionStep, StorageHandle};
pub use topology::DeviceTopology;
