//! Topology Resolver: disk-aware partition naming.
//!
//! Pure and deterministic, no I/O. Given the target device and the swap
//! strategy, computes the partition device paths and their roles. The naming
//! scheme branches on the kernel's convention: devices whose base name ends
//! in a digit (nvme0n1, mmcblk0, loop0) take a literal `p` separator before
//! the partition index, everything else (sda, vda) appends the index
//! directly.

use crate::error::{InstallError, Result};
use crate::plan::SwapStrategy;
use std::path::PathBuf;

/// Partition device paths and their roles, derived once after partitioning
/// and held immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopology {
    /// Partition 1, always the EFI system partition.
    pub efi_partition: PathBuf,
    /// Partition 2 for the dedicated-partition strategy; absent for zram.
    pub swap_partition: Option<PathBuf>,
    /// Partition 2 (zram) or 3 (dedicated swap); backs the pool, or the
    /// LUKS container when encryption is enabled.
    pub data_partition: PathBuf,
}

impl DeviceTopology {
    /// All partition paths in index order.
    pub fn partitions(&self) -> Vec<&PathBuf> {
        let mut parts = vec![&self.efi_partition];
        if let Some(swap) = &self.swap_partition {
            parts.push(swap);
        }
        parts.push(&self.data_partition);
        parts
    }
}

/// Resolve the partition layout for a target device.
///
/// # Errors
///
/// Fails with an input error if the device path cannot be classified into
/// either naming family (not under /dev/, empty base name, or a base name
/// not ending in an ASCII letter or digit).
pub fn resolve(device: &str, swap_strategy: SwapStrategy) -> Result<DeviceTopology> {
    classify(device)?;

    let topology = match swap_strategy {
        SwapStrategy::Partition => DeviceTopology {
            efi_partition: partition_path(device, 1),
            swap_partition: Some(partition_path(device, 2)),
            data_partition: partition_path(device, 3),
        },
        SwapStrategy::Zram => DeviceTopology {
            efi_partition: partition_path(device, 1),
            swap_partition: None,
            data_partition: partition_path(device, 2),
        },
    };

    Ok(topology)
}

/// Check that the device belongs to a supported naming family.
fn classify(device: &str) -> Result<()> {
    let base = device
        .strip_prefix("/dev/")
        .ok_or_else(|| unsupported(device))?;

    if base.is_empty() || base.contains('/') {
        return Err(unsupported(device));
    }

    match base.chars().last() {
        Some(c) if c.is_ascii_alphanumeric() => Ok(()),
        _ => Err(unsupported(device)),
    }
}

fn unsupported(device: &str) -> InstallError {
    InstallError::input(format!("unsupported device topology: '{}'", device))
}

/// Generate a partition device path from a disk path and partition number.
///
/// Handles both `/dev/sda` → `/dev/sda1` and `/dev/nvme0n1` → `/dev/nvme0n1p1`.
fn partition_path(device: &str, index: u32) -> PathBuf {
    if device.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", device, index))
    } else {
        PathBuf::from(format!("{}{}", device, index))
    }
}
