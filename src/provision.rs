//! Storage Provisioner executor.
//!
//! Carries out a `ProvisionPlan` step by step against the external storage
//! tools (`sgdisk`, `mkfs.vfat`, `cryptsetup`, `zpool`, `zfs`, `mount`).
//! Strictly ordered and fail-fast: no step is retried, any failure aborts
//! the pipeline, and no partial-provisioning repair is attempted. The
//! operator starts over from an unpartitioned device.

use crate::error::{InstallError, Result};
use crate::plan::InstallPlan;
use crate::runner;
use crate::storage::{
    plan_provisioning, ProvisionStep, StorageHandle, DATASETS, POOL_FS_OPTS, POOL_NAME, POOL_OPTS,
};
use crate::topology::DeviceTopology;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// EFI system partition size.
const EFI_PART_SIZE: &str = "+1G";

/// Provision the target device according to the plan.
///
/// Returns the handle of the device backing the pool (the raw data
/// partition, or the decrypted mapping when encryption is enabled).
pub fn provision(topology: &DeviceTopology, plan: &InstallPlan) -> Result<StorageHandle> {
    probe_target_device(&plan.device)?;

    let pplan = plan_provisioning(topology, plan);
    info!("\n{}", pplan.summary());

    for step in &pplan.steps {
        info!("provision: {}", step);
        execute_step(step, topology, plan)
            .map_err(|e| InstallError::provisioning(format!("{}: {:#}", step, e)))?;
    }

    Ok(pplan.handle)
}

/// Confirm the target is a block device the kernel can see. Read-only, so
/// it runs even in dry-run mode and a previewed plan with a typo in the
/// device path still fails here.
pub fn probe_target_device(device: &str) -> Result<()> {
    let output = runner::run_probe("lsblk", &["-ndo", "NAME,TYPE", device])
        .map_err(|e| InstallError::input(format!("{:#}", e)))?;

    if !output.success {
        return Err(InstallError::input(format!(
            "target device {} is not a visible block device: {}",
            device,
            output.stderr.trim()
        )));
    }

    Ok(())
}

fn execute_step(
    step: &ProvisionStep,
    topology: &DeviceTopology,
    plan: &InstallPlan,
) -> anyhow::Result<()> {
    match step {
        ProvisionStep::UnmountExisting { device } => unmount_existing(device, topology),
        ProvisionStep::CreatePartitionTable { device } => {
            let dev = device.to_string_lossy();
            runner::run_tool("sgdisk", &["--zap-all", &dev])?
                .ensure_success("partition table wipe")
        }
        ProvisionStep::CreatePartitions { device, swap_size } => {
            create_partitions(&device.to_string_lossy(), swap_size.as_deref())
        }
        ProvisionStep::FormatEfi { device } => {
            let dev = device.to_string_lossy();
            runner::run_tool("mkfs.vfat", &["-F32", "-n", "EFI", &dev])?
                .ensure_success("EFI format")
        }
        ProvisionStep::FormatSwap { device } => {
            let dev = device.to_string_lossy();
            runner::run_tool("mkswap", &["-L", "swap", &dev])?.ensure_success("mkswap")
        }
        ProvisionStep::ActivateSwap { device } => {
            let dev = device.to_string_lossy();
            runner::run_tool("swapon", &[&dev])?.ensure_success("swapon")
        }
        ProvisionStep::LuksFormat { device } => {
            let dev = device.to_string_lossy();
            let passphrase = luks_passphrase(plan)?;
            runner::run_tool_with_stdin(
                "cryptsetup",
                &[
                    "--batch-mode",
                    "luksFormat",
                    "--type",
                    "luks2",
                    "--key-file=-",
                    &dev,
                ],
                passphrase,
            )?
            .ensure_success("LUKS format")
        }
        ProvisionStep::LuksOpen {
            device,
            mapper_name,
        } => {
            let dev = device.to_string_lossy();
            let passphrase = luks_passphrase(plan)?;
            runner::run_tool_with_stdin(
                "cryptsetup",
                &["open", "--key-file=-", &dev, mapper_name],
                passphrase,
            )?
            .ensure_success("LUKS open")
        }
        ProvisionStep::CreatePool { device } => create_pool(&device.to_string_lossy()),
        ProvisionStep::CreateDatasets => create_datasets(),
        ProvisionStep::ExportPool => {
            runner::run_tool("zpool", &["export", POOL_NAME])?.ensure_success("pool export")
        }
        ProvisionStep::ImportPool { altroot } => {
            let root = altroot.to_string_lossy();
            runner::run_tool("zpool", &["import", "-N", "-R", &root, POOL_NAME])?
                .ensure_success("pool import")
        }
        ProvisionStep::MountRootDataset => {
            runner::run_tool("zfs", &["mount", crate::storage::ROOT_DATASET])?
                .ensure_success("root dataset mount")
        }
        ProvisionStep::MountDatasets => {
            runner::run_tool("zfs", &["mount", "-a"])?.ensure_success("dataset mounts")
        }
        ProvisionStep::MountEfi { device, mountpoint } => {
            if !runner::is_dry_run() {
                fs::create_dir_all(mountpoint)?;
            }
            let dev = device.to_string_lossy();
            let mnt = mountpoint.to_string_lossy();
            runner::run_tool("mount", &[&dev, &mnt])?.ensure_success("EFI mount")
        }
        ProvisionStep::CopyHostIdentity => copy_host_identity(Path::new(crate::storage::MOUNT_ROOT)),
    }
}

fn luks_passphrase(plan: &InstallPlan) -> anyhow::Result<&str> {
    plan.luks_passphrase
        .as_ref()
        .map(|s| s.expose())
        .ok_or_else(|| anyhow::anyhow!("encryption enabled but no passphrase in plan"))
}

/// Unmount anything mounted from the target device or its partitions.
///
/// Sources in /proc/mounts are compared by exact path, never substring: a
/// mounted /dev/sda1 must not make /dev/sda12 look busy.
fn unmount_existing(device: &Path, topology: &DeviceTopology) -> anyhow::Result<()> {
    let mounts = fs::read_to_string("/proc/mounts")?;

    let mut candidates: Vec<String> = vec![device.to_string_lossy().into_owned()];
    candidates.extend(
        topology
            .partitions()
            .iter()
            .map(|p| p.to_string_lossy().into_owned()),
    );

    // Deepest mountpoints first so nested mounts unwind cleanly
    let mut busy = mounted_under(&mounts, &candidates);
    busy.sort_by_key(|(_, mountpoint)| std::cmp::Reverse(mountpoint.len()));

    for (source, mountpoint) in busy {
        info!("unmounting {} from {}", source, mountpoint);
        runner::run_tool("umount", &[&mountpoint])?
            .ensure_success(&format!("unmount of {}", mountpoint))?;
    }

    Ok(())
}

/// Exact-match lookup of mounted sources. Pure for testability.
fn mounted_under(mounts: &str, sources: &[String]) -> Vec<(String, String)> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mountpoint = fields.next()?;
            if sources.iter().any(|s| s == source) {
                Some((source.to_string(), mountpoint.to_string()))
            } else {
                None
            }
        })
        .collect()
}

fn create_partitions(device: &str, swap_size: Option<&str>) -> anyhow::Result<()> {
    // Partition 1: EFI. With a dedicated swap strategy partition 2 is swap
    // and 3 is data; otherwise 2 is data.
    let mut args: Vec<String> = vec![
        format!("-n1:1M:{}", EFI_PART_SIZE),
        "-t1:EF00".to_string(),
        "-c1:EFI".to_string(),
    ];

    match swap_size {
        Some(size) => {
            args.push(format!("-n2:0:+{}", size.trim_start_matches('+')));
            args.push("-t2:8200".to_string());
            args.push("-c2:swap".to_string());
            args.push("-n3:0:0".to_string());
            args.push("-t3:BF00".to_string());
            args.push("-c3:zroot".to_string());
        }
        None => {
            args.push("-n2:0:0".to_string());
            args.push("-t2:BF00".to_string());
            args.push("-c2:zroot".to_string());
        }
    }
    args.push(device.to_string());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    runner::run_tool("sgdisk", &arg_refs)?.ensure_success("partition creation")?;

    // Let the kernel pick up the new partition table before formatting
    runner::run_tool("partprobe", &[device])?.ensure_success("partprobe")?;
    let _ = runner::run_tool("udevadm", &["settle"]);

    Ok(())
}

fn create_pool(device: &str) -> anyhow::Result<()> {
    // Ensure the host has a hostid before the pool records one, otherwise
    // the installed system cannot import its own pool at boot
    if !Path::new("/etc/hostid").exists() {
        runner::run_tool("zgenhostid", &[])?.ensure_success("zgenhostid")?;
    }

    let mut args: Vec<String> = vec!["create".to_string(), "-f".to_string()];
    for (key, value) in POOL_OPTS {
        args.push("-o".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in POOL_FS_OPTS {
        args.push("-O".to_string());
        args.push(format!("{}={}", key, value));
    }
    args.push("-m".to_string());
    args.push("none".to_string());
    args.push(POOL_NAME.to_string());
    args.push(device.to_string());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    runner::run_tool("zpool", &arg_refs)?.ensure_success("pool creation")
}

fn create_datasets() -> anyhow::Result<()> {
    for spec in DATASETS {
        let mut args: Vec<String> = vec!["create".to_string()];
        for (key, value) in spec.props {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(format!("{}/{}", POOL_NAME, spec.name));

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        runner::run_tool("zfs", &arg_refs)?
            .ensure_success(&format!("dataset {}", spec.name))?;
    }
    Ok(())
}

/// Copy hostid and pool cache into the target tree.
fn copy_host_identity(target: &Path) -> anyhow::Result<()> {
    if runner::is_dry_run() {
        info!("dry-run: skipping host identity copy");
        return Ok(());
    }

    let etc = target.join("etc");
    fs::create_dir_all(&etc)?;
    fs::copy("/etc/hostid", etc.join("hostid"))?;

    let cache = Path::new("/etc/zfs/zpool.cache");
    if cache.exists() {
        let target_zfs = etc.join("zfs");
        fs::create_dir_all(&target_zfs)?;
        fs::copy(cache, target_zfs.join("zpool.cache"))?;
    } else {
        warn!("no zpool.cache on the live host; installed system will scan for pools");
    }

    Ok(())
}
