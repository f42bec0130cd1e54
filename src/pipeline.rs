//! Install Coordinator: the fail-fast pipeline.
//!
//! Runs the stages in fixed order: resolve topology, provision storage,
//! resolve and acquire the bootstrap archive, extract it, render and run
//! the second-stage script, then tear down. Any stage failure aborts the
//! whole run; nothing is retried at this level and no repair of a
//! half-provisioned target is attempted.

use crate::error::{InstallError, Result};
use crate::mirror::{self, MirrorCandidate};
use crate::plan::InstallPlan;
use crate::render;
use crate::runner;
use crate::storage::MOUNT_ROOT;
use crate::{acquire, provision, topology};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Knobs for a pipeline run that are not part of the install plan itself.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Mirror candidates in priority order.
    pub mirrors: Vec<MirrorCandidate>,
    /// Architecture variant of the bootstrap archive, e.g. "x86_64".
    pub variant: String,
    /// Replacement for the built-in setup script template.
    pub template: Option<PathBuf>,
    /// Reboot the machine once the install completes.
    pub reboot: bool,
    /// Staging mountpoint for the target tree.
    pub mount_root: PathBuf,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mirrors: mirror::default_mirrors(),
            variant: "x86_64".to_string(),
            template: None,
            reboot: false,
            mount_root: PathBuf::from(MOUNT_ROOT),
        }
    }
}

/// Run the complete installation.
pub fn run_install(plan: &InstallPlan, options: &PipelineOptions) -> Result<()> {
    plan.validate()
        .map_err(|e| InstallError::input(format!("{:#}", e)))?;

    let result = run_stages(plan, options);

    if let Err(e) = &result {
        error!("installation failed during {}: {}", e.stage(), e);
    }
    result
}

fn run_stages(plan: &InstallPlan, options: &PipelineOptions) -> Result<()> {
    info!("target device: {}", plan.device);

    let topology = topology::resolve(&plan.device, plan.swap_strategy)?;
    let handle = provision::provision(&topology, plan)?;

    let url = mirror::resolve_artifact(&options.mirrors, &options.variant)?;

    if runner::is_dry_run() {
        info!("dry-run: skipping download and extraction of {}", url);
    } else {
        let staging = options.mount_root.join("var").join("tmp");
        let archive = acquire::acquire(&url, &staging)?;
        acquire::extract(&archive, &options.mount_root)?;
        // The archive has served its purpose; keep the target tree lean
        let _ = fs::remove_file(&archive);
    }

    let template_text = load_template(options)?;
    let bindings = render::bindings_for(plan, &topology, &handle);
    let script = render::render(&template_text, &bindings)?;

    run_in_target(plan, options, &bindings, &script)?;

    teardown(&topology, options)?;

    if options.reboot {
        info!("rebooting into the installed system");
        runner::run_tool("systemctl", &["reboot"])
            .and_then(|o| o.ensure_success("reboot"))
            .map_err(|e| InstallError::teardown(format!("{:#}", e)))?;
    } else {
        info!("installation complete; reboot when ready");
    }

    Ok(())
}

fn load_template(options: &PipelineOptions) -> Result<String> {
    match &options.template {
        Some(path) => fs::read_to_string(path).map_err(|e| {
            InstallError::render(format!(
                "cannot read template {}: {}",
                path.display(),
                e
            ))
        }),
        None => Ok(render::default_template().to_string()),
    }
}

/// Place the rendered script inside the target, execute it through
/// arch-chroot, and remove it afterwards whatever the outcome.
///
/// The full binding set is exported into the chroot environment; passwords
/// ride alongside it and reach the script only through the environment,
/// never through the file on disk.
fn run_in_target(
    plan: &InstallPlan,
    options: &PipelineOptions,
    bindings: &render::Bindings,
    script: &render::RenderedScript,
) -> Result<()> {
    let script_path = options.mount_root.join("root").join("setup.sh");

    if !runner::is_dry_run() {
        if let Some(parent) = script_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| InstallError::execution(format!("cannot stage setup script: {}", e)))?;
        }
        script
            .write_to(&script_path)
            .map_err(|e| InstallError::execution(format!("cannot stage setup script: {}", e)))?;
    }

    let mut env: Vec<(String, String)> = bindings
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.push((
        "USER_PASSWORD".to_string(),
        plan.credentials.user_password.expose().to_string(),
    ));
    env.push((
        "ROOT_PASSWORD".to_string(),
        plan.credentials.root_password.expose().to_string(),
    ));

    let root = options.mount_root.to_string_lossy();
    let outcome = runner::run_tool_with_env(
        "arch-chroot",
        &[&root, "/bin/bash", "/root/setup.sh"],
        &env,
    )
    .and_then(|out| out.ensure_success("second-stage setup"));

    if !runner::is_dry_run() && script_path.exists() {
        // Remove the script regardless of how the chroot run went
        let _ = fs::remove_file(&script_path);
    }

    outcome.map_err(|e| InstallError::execution(format!("{:#}", e)))
}

/// Unwind the staging mounts and export the pool so the target is clean for
/// first boot. Failures here are fatal and reported under their own stage:
/// an exported pool is part of the contract, not a nicety.
fn teardown(topology: &topology::DeviceTopology, options: &PipelineOptions) -> Result<()> {
    if let Some(swap) = &topology.swap_partition {
        let dev = swap.to_string_lossy();
        if let Err(e) = runner::run_tool("swapoff", &[&dev]).and_then(|o| o.ensure_success("swapoff"))
        {
            warn!("could not deactivate swap: {:#}", e);
        }
    }

    let boot = options.mount_root.join("boot");
    let boot_str = boot.to_string_lossy();
    runner::run_tool("umount", &[&boot_str])
        .and_then(|o| o.ensure_success("EFI unmount"))
        .map_err(|e| InstallError::teardown(format!("{:#}", e)))?;

    runner::run_tool("zpool", &["export", crate::storage::POOL_NAME])
        .and_then(|o| o.ensure_success("final pool export"))
        .map_err(|e| InstallError::teardown(format!("{:#}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = PipelineOptions::default();
        assert_eq!(options.variant, "x86_64");
        assert_eq!(options.mount_root, PathBuf::from("/mnt"));
        assert!(!options.reboot);
        assert!(options.template.is_none());
        assert!(!options.mirrors.is_empty());
    }

    #[test]
    fn test_invalid_plan_fails_before_any_stage() {
        let mut plan = crate::plan::sample_plan();
        plan.device = "not-a-device".to_string();

        let err = run_install(&plan, &PipelineOptions::default()).unwrap_err();
        assert_eq!(err.stage(), "input");
    }

    #[test]
    fn test_custom_template_must_exist() {
        let options = PipelineOptions {
            template: Some(PathBuf::from("/nonexistent/template.sh.in")),
            ..Default::default()
        };
        assert!(load_template(&options).is_err());
    }

    #[test]
    fn test_teardown_failure_reports_teardown_stage() {
        // Nothing is mounted under a fresh temp dir, so the EFI unmount
        // fails; the reported stage must not be chroot-execution
        let dir = tempfile::tempdir().unwrap();
        let topo =
            crate::topology::resolve("/dev/sda", crate::plan::SwapStrategy::Zram).unwrap();
        let options = PipelineOptions {
            mount_root: dir.path().to_path_buf(),
            ..Default::default()
        };

        let err = teardown(&topo, &options).unwrap_err();
        assert_eq!(err.stage(), "teardown");
    }

    #[test]
    fn test_builtin_template_loads() {
        let text = load_template(&PipelineOptions::default()).unwrap();
        assert!(text.contains("{{HOSTNAME}}"));
    }
}
