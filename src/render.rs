//! Target Configurator: render the second-stage setup script.
//!
//! The script template carries `{{NAME}}` placeholders. Rendering is a
//! single pass over the template text: every placeholder must have a
//! binding, and an unbound placeholder is a hard error listing ALL missing
//! names at once so the operator fixes the template in one round. Values
//! are substituted verbatim; because substitution is single-pass, a value
//! containing `{{` cannot smuggle in a second expansion.

use crate::error::{InstallError, Result};
use crate::plan::InstallPlan;
use crate::storage::StorageHandle;
use crate::topology::DeviceTopology;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Ordered name/value bindings for template rendering. BTreeMap keeps the
/// environment-variable export order stable.
pub type Bindings = BTreeMap<String, String>;

/// A fully rendered setup script. Holds credentials in substituted form, so
/// `Debug` never prints the content.
pub struct RenderedScript {
    content: String,
}

impl RenderedScript {
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Write the script to disk, executable by owner only.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

impl fmt::Debug for RenderedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RenderedScript({} bytes, <redacted>)", self.content.len())
    }
}

/// The setup script shipped with the binary.
pub fn default_template() -> &'static str {
    include_str!("../templates/setup.sh.in")
}

/// All placeholder names occurring in a template, in order of first
/// appearance, without duplicates.
pub fn scan_placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                if is_placeholder_name(name) && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
                rest = &after[end + 2..];
            }
            None => break,
        }
    }

    names
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Render a template against the bindings.
///
/// # Errors
///
/// Fails with a render error naming every placeholder that has no binding.
/// Bindings without a matching placeholder are allowed and ignored.
pub fn render(template: &str, bindings: &Bindings) -> Result<RenderedScript> {
    let placeholders = scan_placeholders(template);

    let missing: Vec<&str> = placeholders
        .iter()
        .filter(|name| !bindings.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(InstallError::render(format!(
            "template has unbound placeholders: {}",
            missing.join(", ")
        )));
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) if is_placeholder_name(&after[..end]) => {
                output.push_str(&rest[..start]);
                // scan_placeholders guarantees a binding exists
                output.push_str(&bindings[&after[..end]]);
                rest = &after[end + 2..];
            }
            _ => {
                // Literal braces that are not a placeholder
                output.push_str(&rest[..start + 2]);
                rest = &rest[start + 2..];
            }
        }
    }
    output.push_str(rest);

    Ok(RenderedScript { content: output })
}

/// Derive the full binding set from the plan and the provisioned layout.
///
/// Passwords are deliberately absent: they reach the script through the
/// chroot environment, never through the rendered file on disk.
pub fn bindings_for(
    plan: &InstallPlan,
    topology: &DeviceTopology,
    handle: &StorageHandle,
) -> Bindings {
    let mut bindings = Bindings::new();

    bindings.insert("HOSTNAME".into(), plan.hostname.clone());
    bindings.insert("LOCALE".into(), plan.locale.clone());
    bindings.insert("TIMEZONE".into(), plan.timezone.clone());
    bindings.insert("USERNAME".into(), plan.credentials.username.clone());
    bindings.insert("INIT_SYSTEM".into(), plan.init_system.to_string());
    bindings.insert("ENCRYPTION".into(), bool_str(plan.encryption).into());
    bindings.insert(
        "ZRAM_SWAP".into(),
        bool_str(topology.swap_partition.is_none()).into(),
    );
    bindings.insert(
        "SWAP_PARTITION".into(),
        topology
            .swap_partition
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    bindings.insert(
        "EFI_PARTITION".into(),
        topology.efi_partition.to_string_lossy().into_owned(),
    );
    bindings.insert(
        "DATA_PARTITION".into(),
        topology.data_partition.to_string_lossy().into_owned(),
    );
    bindings.insert(
        "POOL_DEVICE".into(),
        handle.device.to_string_lossy().into_owned(),
    );
    bindings.insert(
        "VIDEO_DRIVERS".into(),
        plan.video_drivers
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(" "),
    );

    bindings
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scan_finds_placeholders_in_order() {
        let names = scan_placeholders("a {{ONE}} b {{TWO}} c {{ONE}}");
        assert_eq!(names, vec!["ONE", "TWO"]);
    }

    #[test]
    fn test_scan_ignores_malformed_tokens() {
        assert!(scan_placeholders("{{lower}} {{}} {{SP ACE}} {{").is_empty());
    }

    #[test]
    fn test_render_substitutes_all_occurrences() {
        let b = bindings(&[("NAME", "zroot")]);
        let script = render("pool={{NAME}} again={{NAME}}", &b).unwrap();
        assert_eq!(script.content(), "pool=zroot again=zroot");
    }

    #[test]
    fn test_render_reports_all_missing_placeholders() {
        let b = bindings(&[("HOSTNAME", "box")]);
        let err = render("{{HOSTNAME}} {{LOCALE}} {{TIMEZONE}}", &b).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("LOCALE"));
        assert!(msg.contains("TIMEZONE"));
        assert!(!msg.contains("HOSTNAME,"));
    }

    #[test]
    fn test_render_is_single_pass() {
        // A value containing placeholder syntax must not expand further
        let b = bindings(&[("A", "{{B}}"), ("B", "evil")]);
        let script = render("x={{A}}", &b).unwrap();
        assert_eq!(script.content(), "x={{B}}");
    }

    #[test]
    fn test_render_preserves_literal_braces() {
        let b = Bindings::new();
        let script = render("awk '{{print $1}}'", &b).unwrap();
        assert_eq!(script.content(), "awk '{{print $1}}'");
    }

    #[test]
    fn test_extra_bindings_are_ignored() {
        let b = bindings(&[("USED", "x"), ("UNUSED", "y")]);
        let script = render("{{USED}}", &b).unwrap();
        assert_eq!(script.content(), "x");
    }

    #[test]
    fn test_rendered_debug_is_redacted() {
        let b = bindings(&[("ROOT_PASSWORD", "swordfish")]);
        let script = render("pw={{ROOT_PASSWORD}}", &b).unwrap();
        let formatted = format!("{:?}", script);
        assert!(!formatted.contains("swordfish"));
    }

    #[test]
    fn test_write_to_sets_owner_only_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setup.sh");

        let script = render("#!/bin/bash\n", &Bindings::new()).unwrap();
        script.write_to(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
