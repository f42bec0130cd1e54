//! Storage provisioning plan.
//!
//! Translates a `DeviceTopology` + `InstallPlan` into an ordered sequence of
//! atomic `ProvisionStep`s that the executor (`provision.rs`) carries out.
//!
//! # Step order
//!
//! | Strategy              | Steps |
//! |-----------------------|-------|
//! | plain                 | Unmount → PartitionTable → Partitions → FormatEfi → Pool → Datasets → Export → Import → Mounts → HostIdentity |
//! | dedicated swap        | ... → FormatEfi → FormatSwap → ActivateSwap → Pool → ... |
//! | encrypted             | ... → FormatEfi → LuksFormat → LuksOpen → Pool(on mapper) → ... |
//!
//! # Design
//!
//! - **Pure logic**: no I/O, no side effects, only generates the plan
//! - **Fixed policy**: pool and dataset properties are design invariants of
//!   the produced system, not user-configurable defaults
//! - **Testable**: config → plan assertions with no hardware involved
//!
//! The export-then-reimport pair after dataset creation is load-bearing: the
//! pool must be importable under the staging altroot, and the boot
//! environment dataset is `canmount=noauto` so the bootloader can run its
//! own mount-then-boot handshake.

use crate::plan::{InstallPlan, SwapStrategy};
use crate::topology::DeviceTopology;
use std::fmt;
use std::path::PathBuf;

/// Name of the root pool.
pub const POOL_NAME: &str = "zroot";

/// Device-mapper name for the decrypted data partition.
pub const MAPPER_NAME: &str = "cryptroot";

/// Staging mountpoint the pool is re-imported under.
pub const MOUNT_ROOT: &str = "/mnt";

/// Boot environment dataset, mounted explicitly after import.
pub const ROOT_DATASET: &str = "zroot/ROOT/default";

/// Pool-level creation options. Tuned for 4K-native media with automatic
/// trim; not user-configurable.
pub const POOL_OPTS: &[(&str, &str)] = &[("ashift", "12"), ("autotrim", "on")];

/// Filesystem-level options applied at pool creation to every dataset.
pub const POOL_FS_OPTS: &[(&str, &str)] = &[
    ("compression", "zstd"),
    ("xattr", "sa"),
    ("relatime", "on"),
    ("acltype", "posixacl"),
    ("normalization", "formD"),
    ("mountpoint", "none"),
];

/// A dataset in the fixed layout tree.
pub struct DatasetSpec {
    /// Name relative to the pool, e.g. "ROOT/default".
    pub name: &'static str,
    pub props: &'static [(&'static str, &'static str)],
}

/// Fixed dataset tree, in creation order (parents first). Per-workload
/// tuning: logs compress well and stay at small records, caches barely
/// compress and read in large blocks.
pub const DATASETS: &[DatasetSpec] = &[
    DatasetSpec {
        name: "ROOT",
        props: &[("canmount", "off"), ("mountpoint", "none")],
    },
    DatasetSpec {
        name: "ROOT/default",
        props: &[("canmount", "noauto"), ("mountpoint", "/")],
    },
    DatasetSpec {
        name: "home",
        props: &[("mountpoint", "/home")],
    },
    DatasetSpec {
        name: "var",
        props: &[("canmount", "off"), ("mountpoint", "/var")],
    },
    DatasetSpec {
        name: "var/log",
        props: &[("compression", "gzip"), ("recordsize", "128K")],
    },
    DatasetSpec {
        name: "var/cache",
        props: &[("compression", "lz4"), ("recordsize", "1M")],
    },
    DatasetSpec {
        name: "tmp",
        props: &[
            ("mountpoint", "/tmp"),
            ("compression", "lz4"),
            ("devices", "off"),
            ("setuid", "off"),
        ],
    },
];

/// The block device actually holding the pool: the raw data partition, or
/// the decrypted mapping when encryption is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHandle {
    pub device: PathBuf,
}

/// A single atomic provisioning operation.
///
/// Operations are strictly ordered; the plan generator ensures correct
/// sequencing (LuksFormat before LuksOpen, Export before Import).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Unmount anything currently mounted from the target device.
    UnmountExisting { device: PathBuf },

    /// Wipe and recreate the GPT partition table (sgdisk).
    CreatePartitionTable { device: PathBuf },

    /// Create EFI (+ swap) + data partitions.
    CreatePartitions {
        device: PathBuf,
        swap_size: Option<String>,
    },

    /// Format the EFI system partition as FAT32.
    FormatEfi { device: PathBuf },

    /// Initialize the swap partition.
    FormatSwap { device: PathBuf },

    /// Activate the swap partition for the duration of the install.
    ActivateSwap { device: PathBuf },

    /// Create the LUKS2 container on the data partition.
    LuksFormat { device: PathBuf },

    /// Open the LUKS container.
    LuksOpen {
        device: PathBuf,
        mapper_name: String,
    },

    /// Create the pool on the backing device with fixed policy options.
    CreatePool { device: PathBuf },

    /// Create the fixed dataset tree.
    CreateDatasets,

    /// Export the pool after creation.
    ExportPool,

    /// Re-import the pool under the staging altroot.
    ImportPool { altroot: PathBuf },

    /// Explicitly mount the noauto boot environment dataset.
    MountRootDataset,

    /// Mount the remaining datasets.
    MountDatasets,

    /// Mount the EFI partition inside the staging tree.
    MountEfi {
        device: PathBuf,
        mountpoint: PathBuf,
    },

    /// Copy hostid and pool cache into the target so the installed system
    /// can import its own pool at boot.
    CopyHostIdentity,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnmountExisting { device } => {
                write!(f, "UnmountExisting({})", device.display())
            }
            Self::CreatePartitionTable { device } => {
                write!(f, "CreatePartitionTable({})", device.display())
            }
            Self::CreatePartitions { device, swap_size } => {
                write!(
                    f,
                    "CreatePartitions({}, swap={:?})",
                    device.display(),
                    swap_size
                )
            }
            Self::FormatEfi { device } => write!(f, "FormatEfi({})", device.display()),
            Self::FormatSwap { device } => write!(f, "FormatSwap({})", device.display()),
            Self::ActivateSwap { device } => write!(f, "ActivateSwap({})", device.display()),
            Self::LuksFormat { device } => write!(f, "LuksFormat({})", device.display()),
            Self::LuksOpen {
                device,
                mapper_name,
            } => {
                write!(
                    f,
                    "LuksOpen({} -> /dev/mapper/{})",
                    device.display(),
                    mapper_name
                )
            }
            Self::CreatePool { device } => {
                write!(f, "CreatePool({} on {})", POOL_NAME, device.display())
            }
            Self::CreateDatasets => write!(f, "CreateDatasets({} datasets)", DATASETS.len()),
            Self::ExportPool => write!(f, "ExportPool({})", POOL_NAME),
            Self::ImportPool { altroot } => {
                write!(f, "ImportPool({} -R {})", POOL_NAME, altroot.display())
            }
            Self::MountRootDataset => write!(f, "MountRootDataset({})", ROOT_DATASET),
            Self::MountDatasets => write!(f, "MountDatasets"),
            Self::MountEfi { device, mountpoint } => {
                write!(
                    f,
                    "MountEfi({} -> {})",
                    device.display(),
                    mountpoint.display()
                )
            }
            Self::CopyHostIdentity => write!(f, "CopyHostIdentity"),
        }
    }
}

/// A complete provisioning plan: an ordered list of steps plus the resolved
/// pool backing device.
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub steps: Vec<ProvisionStep>,
    pub device: PathBuf,
    pub encrypted: bool,
    /// Backing device the pool is created on.
    pub handle: StorageHandle,
}

impl ProvisionPlan {
    /// Summary of the plan for logging/preview.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Provision Plan: {}", self.device.display()),
            format!("  Encrypted: {}", self.encrypted),
            format!("  Pool device: {}", self.handle.device.display()),
            format!("  Steps ({}):", self.steps.len()),
        ];
        for (i, step) in self.steps.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, step));
        }
        lines.join("\n")
    }
}

/// Generate the ordered provisioning plan. Pure, no I/O.
pub fn plan_provisioning(topology: &DeviceTopology, plan: &InstallPlan) -> ProvisionPlan {
    let device = PathBuf::from(&plan.device);
    let mut steps = Vec::new();

    steps.push(ProvisionStep::UnmountExisting {
        device: device.clone(),
    });
    steps.push(ProvisionStep::CreatePartitionTable {
        device: device.clone(),
    });
    steps.push(ProvisionStep::CreatePartitions {
        device: device.clone(),
        swap_size: match plan.swap_strategy {
            SwapStrategy::Partition => Some(plan.swap_size.clone()),
            SwapStrategy::Zram => None,
        },
    });
    steps.push(ProvisionStep::FormatEfi {
        device: topology.efi_partition.clone(),
    });

    if let Some(swap) = &topology.swap_partition {
        steps.push(ProvisionStep::FormatSwap {
            device: swap.clone(),
        });
        steps.push(ProvisionStep::ActivateSwap {
            device: swap.clone(),
        });
    }

    let handle = if plan.encryption {
        steps.push(ProvisionStep::LuksFormat {
            device: topology.data_partition.clone(),
        });
        steps.push(ProvisionStep::LuksOpen {
            device: topology.data_partition.clone(),
            mapper_name: MAPPER_NAME.to_string(),
        });
        StorageHandle {
            device: PathBuf::from(format!("/dev/mapper/{}", MAPPER_NAME)),
        }
    } else {
        StorageHandle {
            device: topology.data_partition.clone(),
        }
    };

    steps.push(ProvisionStep::CreatePool {
        device: handle.device.clone(),
    });
    steps.push(ProvisionStep::CreateDatasets);
    steps.push(ProvisionStep::ExportPool);
    steps.push(ProvisionStep::ImportPool {
        altroot: PathBuf::from(MOUNT_ROOT),
    });
    steps.push(ProvisionStep::MountRootDataset);
    steps.push(ProvisionStep::MountDatasets);
    steps.push(ProvisionStep::MountEfi {
        device: topology.efi_partition.clone(),
        mountpoint: PathBuf::from(MOUNT_ROOT).join("boot"),
    });
    steps.push(ProvisionStep::CopyHostIdentity);

    ProvisionPlan {
        steps,
        device,
        encrypted: plan.encryption,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Credentials, InitSystem, Secret};
    use crate::topology;

    fn test_plan(device: &str, swap: SwapStrategy, encryption: bool) -> InstallPlan {
        InstallPlan {
            device: device.to_string(),
            encryption,
            luks_passphrase: encryption.then(|| Secret::new("passphrase")),
            swap_strategy: swap,
            swap_size: "8G".to_string(),
            init_system: InitSystem::Systemd,
            locale: "en_US.UTF-8".to_string(),
            timezone: "Europe/Berlin".to_string(),
            hostname: "testhost".to_string(),
            credentials: Credentials {
                username: "tester".to_string(),
                user_password: Secret::new("pw"),
                root_password: Secret::new("pw"),
            },
            video_drivers: vec![],
        }
    }

    fn make(device: &str, swap: SwapStrategy, encryption: bool) -> ProvisionPlan {
        let plan = test_plan(device, swap, encryption);
        let topo = topology::resolve(&plan.device, plan.swap_strategy).unwrap();
        plan_provisioning(&topo, &plan)
    }

    fn position(plan: &ProvisionPlan, pred: impl Fn(&ProvisionStep) -> bool) -> Option<usize> {
        plan.steps.iter().position(pred)
    }

    #[test]
    fn test_unencrypted_sda_with_dedicated_swap() {
        // End-to-end scenario: /dev/sda, dedicated swap, no encryption
        let plan = make("/dev/sda", SwapStrategy::Partition, false);

        assert!(!plan.encrypted);
        assert_eq!(plan.handle.device, PathBuf::from("/dev/sda3"));

        // No LUKS steps at all
        assert!(!plan
            .steps
            .iter()
            .any(|s| matches!(s, ProvisionStep::LuksFormat { .. } | ProvisionStep::LuksOpen { .. })));

        // Swap activation leads directly into pool creation
        let swap_idx = position(&plan, |s| matches!(s, ProvisionStep::ActivateSwap { .. })).unwrap();
        let pool_idx = position(&plan, |s| matches!(s, ProvisionStep::CreatePool { .. })).unwrap();
        assert_eq!(pool_idx, swap_idx + 1);
    }

    #[test]
    fn test_encrypted_nvme_zram() {
        // End-to-end scenario: /dev/nvme0n1, zram, encryption enabled
        let plan = make("/dev/nvme0n1", SwapStrategy::Zram, true);

        assert!(plan.encrypted);

        // No swap partition steps
        assert!(!plan
            .steps
            .iter()
            .any(|s| matches!(s, ProvisionStep::FormatSwap { .. } | ProvisionStep::ActivateSwap { .. })));

        // LUKS create + open both precede pool creation
        let format_idx = position(&plan, |s| matches!(s, ProvisionStep::LuksFormat { .. })).unwrap();
        let open_idx = position(&plan, |s| matches!(s, ProvisionStep::LuksOpen { .. })).unwrap();
        let pool_idx = position(&plan, |s| matches!(s, ProvisionStep::CreatePool { .. })).unwrap();
        assert!(format_idx < open_idx);
        assert!(open_idx < pool_idx);

        // Pool is backed by the decrypted mapping, not the raw partition
        assert_eq!(plan.handle.device, PathBuf::from("/dev/mapper/cryptroot"));
        assert!(plan.steps.iter().any(|s| matches!(
            s,
            ProvisionStep::CreatePool { device } if device == &PathBuf::from("/dev/mapper/cryptroot")
        )));
        assert!(!plan.steps.iter().any(|s| matches!(
            s,
            ProvisionStep::CreatePool { device } if device == &PathBuf::from("/dev/nvme0n1p2")
        )));

        // LUKS container sits on the raw data partition
        assert!(plan.steps.iter().any(|s| matches!(
            s,
            ProvisionStep::LuksFormat { device } if device == &PathBuf::from("/dev/nvme0n1p2")
        )));
    }

    #[test]
    fn test_step_ordering_export_before_import() {
        let plan = make("/dev/sda", SwapStrategy::Zram, false);

        let create_idx = position(&plan, |s| matches!(s, ProvisionStep::CreatePool { .. })).unwrap();
        let datasets_idx = position(&plan, |s| matches!(s, ProvisionStep::CreateDatasets)).unwrap();
        let export_idx = position(&plan, |s| matches!(s, ProvisionStep::ExportPool)).unwrap();
        let import_idx = position(&plan, |s| matches!(s, ProvisionStep::ImportPool { .. })).unwrap();
        let mount_root_idx = position(&plan, |s| matches!(s, ProvisionStep::MountRootDataset)).unwrap();

        assert!(create_idx < datasets_idx);
        assert!(datasets_idx < export_idx);
        assert!(export_idx < import_idx);
        assert!(import_idx < mount_root_idx);
    }

    #[test]
    fn test_first_steps_are_unmount_and_partition_table() {
        let plan = make("/dev/sda", SwapStrategy::Partition, true);
        assert!(matches!(&plan.steps[0], ProvisionStep::UnmountExisting { .. }));
        assert!(matches!(
            &plan.steps[1],
            ProvisionStep::CreatePartitionTable { .. }
        ));
    }

    #[test]
    fn test_host_identity_is_last() {
        let plan = make("/dev/nvme0n1", SwapStrategy::Zram, false);
        assert!(matches!(
            plan.steps.last().unwrap(),
            ProvisionStep::CopyHostIdentity
        ));
    }

    #[test]
    fn test_efi_mounted_under_staging_root() {
        let plan = make("/dev/sda", SwapStrategy::Zram, false);
        assert!(plan.steps.iter().any(|s| matches!(
            s,
            ProvisionStep::MountEfi { mountpoint, .. }
                if mountpoint == &PathBuf::from("/mnt/boot")
        )));
    }

    #[test]
    fn test_import_uses_altroot() {
        let plan = make("/dev/sda", SwapStrategy::Zram, false);
        assert!(plan.steps.iter().any(|s| matches!(
            s,
            ProvisionStep::ImportPool { altroot } if altroot == &PathBuf::from("/mnt")
        )));
    }

    #[test]
    fn test_dataset_tree_shape() {
        // Boot environment dataset must not auto-mount at import
        let root = DATASETS
            .iter()
            .find(|d| d.name == "ROOT/default")
            .expect("boot environment dataset");
        assert!(root.props.contains(&("canmount", "noauto")));

        // Containers never mount
        let container = DATASETS.iter().find(|d| d.name == "ROOT").unwrap();
        assert!(container.props.contains(&("canmount", "off")));

        // Per-workload compression differs across the tree
        let log = DATASETS.iter().find(|d| d.name == "var/log").unwrap();
        let cache = DATASETS.iter().find(|d| d.name == "var/cache").unwrap();
        let log_comp = log.props.iter().find(|(k, _)| *k == "compression").unwrap();
        let cache_comp = cache.props.iter().find(|(k, _)| *k == "compression").unwrap();
        assert_ne!(log_comp.1, cache_comp.1);
    }

    #[test]
    fn test_summary_not_empty() {
        let plan = make("/dev/sda", SwapStrategy::Partition, false);
        let summary = plan.summary();
        assert!(summary.contains("/dev/sda"));
        assert!(summary.contains("CreatePool"));
    }
}
