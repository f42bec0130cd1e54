//! The install plan: every decision made before execution begins.
//!
//! This module uses type-safe enums instead of strings for plan values,
//! providing compile-time validation and preventing typos. An `InstallPlan`
//! is created once (loaded from a JSON plan file or built by an external
//! collector) and never mutated afterwards: components receive it by
//! shared reference and re-running collection produces a new plan.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use strum::{Display, EnumIter, EnumString};

/// Swap strategy for the installed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum SwapStrategy {
    /// No swap partition; the installed system uses compressed-RAM swap.
    #[default]
    #[strum(serialize = "zram")]
    Zram,
    /// Dedicated swap partition between the EFI and data partitions.
    #[strum(serialize = "partition")]
    Partition,
}

/// Init system of the installed base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    #[default]
    #[strum(serialize = "systemd")]
    Systemd,
    #[strum(serialize = "openrc")]
    OpenRc,
    #[strum(serialize = "runit")]
    Runit,
}

/// Video driver selection for the installed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum VideoDriver {
    #[strum(serialize = "amd")]
    Amd,
    #[strum(serialize = "intel")]
    Intel,
    #[strum(serialize = "nvidia")]
    Nvidia,
    #[strum(serialize = "vesa")]
    Vesa,
}

/// A secret value held only in memory. `Debug` and `Display` never reveal it;
/// log output therefore cannot leak passwords even with `{:?}` formatting.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying value. Callers must only pass it to stdin pipes
    /// or environment variables, never to log or argv strings.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Account credentials for the installed system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub user_password: Secret,
    pub root_password: Secret,
}

/// Immutable record of all installation choices.
///
/// Invariant: once constructed, never mutated. Every core component takes
/// `&InstallPlan` and reads it; nothing is re-derived or re-prompted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallPlan {
    /// Target disk path like /dev/sda
    pub device: String,
    /// Whether the data partition is wrapped in LUKS
    pub encryption: bool,
    /// Passphrase for the LUKS volume; required when `encryption` is true
    #[serde(default)]
    pub luks_passphrase: Option<Secret>,
    pub swap_strategy: SwapStrategy,
    /// Swap partition size like "8G"; used only for the partition strategy
    #[serde(default = "default_swap_size")]
    pub swap_size: String,
    pub init_system: InitSystem,
    pub locale: String,
    pub timezone: String,
    pub hostname: String,
    pub credentials: Credentials,
    #[serde(default)]
    pub video_drivers: Vec<VideoDriver>,
}

fn default_swap_size() -> String {
    "8G".to_string()
}

impl InstallPlan {
    /// Load a plan from a JSON file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read plan file {:?}", path.as_ref()))?;

        let plan: Self =
            serde_json::from_str(&content).context("Failed to parse plan file JSON")?;

        Ok(plan)
    }

    /// Save a plan to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize plan to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write plan to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate the plan before any destructive work starts.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            anyhow::bail!("Target device must be specified");
        }
        if !self.device.starts_with("/dev/") {
            anyhow::bail!("Target device '{}' must start with /dev/", self.device);
        }

        validate_name("Hostname", &self.hostname)?;
        validate_name("Username", &self.credentials.username)?;

        validate_password("User password", &self.credentials.user_password)?;
        validate_password("Root password", &self.credentials.root_password)?;

        if self.encryption {
            match &self.luks_passphrase {
                Some(p) if !p.is_empty() => {}
                _ => anyhow::bail!("Encryption is enabled but no LUKS passphrase was provided"),
            }
        }

        if self.swap_strategy == SwapStrategy::Partition {
            let size = self.swap_size.trim();
            if size.is_empty() {
                anyhow::bail!("Swap size must be specified for the partition strategy");
            }
            let digits = size.trim_end_matches(|c: char| c.is_ascii_alphabetic());
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("Swap size '{}' is not a valid size like 8G", size);
            }
        }

        if self.locale.trim().is_empty() {
            anyhow::bail!("Locale must be specified");
        }
        if self.timezone.trim().is_empty() || !self.timezone.contains('/') {
            anyhow::bail!("Timezone must be a zoneinfo name like Europe/Berlin");
        }

        Ok(())
    }
}

/// Hostname/username shape: 3-32 chars, starts with a letter, alphanumeric
/// plus underscore.
fn validate_name(what: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        anyhow::bail!("{} must be specified", what);
    }
    if value.len() < 3 || value.len() > 32 {
        anyhow::bail!("{} must be 3-32 characters long", what);
    }
    if let Some(first_char) = value.chars().next() {
        if !first_char.is_ascii_alphabetic() {
            anyhow::bail!("{} must start with a letter", what);
        }
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("{} can only contain letters, numbers, and underscores", what);
    }
    Ok(())
}

fn validate_password(what: &str, value: &Secret) -> Result<()> {
    if value.expose().trim().is_empty() {
        anyhow::bail!("{} must be specified", what);
    }
    if value.expose().contains(char::is_whitespace) {
        anyhow::bail!("{} cannot contain whitespace", what);
    }
    Ok(())
}

/// Baseline plan for tests across the crate.
#[cfg(test)]
pub(crate) fn sample_plan() -> InstallPlan {
    InstallPlan {
        device: "/dev/sda".to_string(),
        encryption: false,
        luks_passphrase: None,
        swap_strategy: SwapStrategy::Partition,
        swap_size: "8G".to_string(),
        init_system: InitSystem::Systemd,
        locale: "en_US.UTF-8".to_string(),
        timezone: "Europe/Berlin".to_string(),
        hostname: "workstation".to_string(),
        credentials: Credentials {
            username: "alex".to_string(),
            user_password: Secret::new("hunter2x"),
            root_password: Secret::new("correcthorse"),
        },
        video_drivers: vec![VideoDriver::Amd],
    }
}
