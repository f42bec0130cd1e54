//! Sanctioned execution of external storage and system tools.
//!
//! All tool invocations go through this module so that every child gets
//! process group isolation, PID registration for cleanup, and consistent
//! logging. Exit success/failure is the only structured feedback an
//! external tool gives us; stdout/stderr are captured as diagnostic text.
//!
//! Secrets travel exclusively via stdin pipes or environment variables.
//! Argument vectors are logged; stdin contents and environment values are
//! not.

use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Global dry-run flag. When set, destructive tool invocations are logged
/// and skipped; read-only probes still execute so previews stay realistic.
static DRY_RUN: AtomicBool = AtomicBool::new(false);

/// Enable dry-run mode.
pub fn enable_dry_run() {
    DRY_RUN.store(true, Ordering::SeqCst);
}

/// Check whether dry-run mode is active.
pub fn is_dry_run() -> bool {
    DRY_RUN.load(Ordering::SeqCst)
}

/// Output from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the tool exited successfully.
    pub success: bool,
}

impl ToolOutput {
    /// Check success and convert a failure into an error with diagnostics.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            let code = self.exit_code.unwrap_or(-1);
            anyhow::bail!(
                "{} failed (exit code {}): {}",
                context,
                code,
                self.stderr.trim()
            )
        }
    }

    fn skipped() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }
}

/// Run a read-only probe tool. Executes even in dry-run mode.
pub fn run_probe(program: &str, args: &[&str]) -> Result<ToolOutput> {
    execute(program, args, None, &[])
}

/// Run a destructive tool. Skipped (and logged) in dry-run mode.
pub fn run_tool(program: &str, args: &[&str]) -> Result<ToolOutput> {
    if is_dry_run() {
        info!("dry-run: skipping `{} {}`", program, args.join(" "));
        return Ok(ToolOutput::skipped());
    }
    execute(program, args, None, &[])
}

/// Run a destructive tool with data piped to its stdin (LUKS passphrases).
/// The stdin contents are never logged.
pub fn run_tool_with_stdin(program: &str, args: &[&str], stdin_data: &str) -> Result<ToolOutput> {
    if is_dry_run() {
        info!(
            "dry-run: skipping `{} {}` (with piped stdin)",
            program,
            args.join(" ")
        );
        return Ok(ToolOutput::skipped());
    }
    execute(program, args, Some(stdin_data), &[])
}

/// Run a destructive tool with extra environment variables. Only the
/// variable names are logged, never the values.
pub fn run_tool_with_env(
    program: &str,
    args: &[&str],
    env: &[(String, String)],
) -> Result<ToolOutput> {
    if is_dry_run() {
        let keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
        info!(
            "dry-run: skipping `{} {}` env={:?}",
            program,
            args.join(" "),
            keys
        );
        return Ok(ToolOutput::skipped());
    }
    execute(program, args, None, env)
}

fn execute(
    program: &str,
    args: &[&str],
    stdin_data: Option<&str>,
    env: &[(String, String)],
) -> Result<ToolOutput> {
    let env_keys: Vec<&str> = env.iter().map(|(k, _)| k.as_str()).collect();
    info!("run: {} {} env={:?}", program, args.join(" "), env_keys);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn '{}'. Is it installed?", program))?;
    let pid = child.id();

    // Register PID for cleanup on parent exit
    {
        let registry = ChildRegistry::global();
        let mut guard = registry.lock().expect("ChildRegistry mutex poisoned");
        guard.register(pid);
    }

    if let Some(data) = stdin_data {
        // Take the handle so the pipe closes once written
        let mut stdin = child
            .stdin
            .take()
            .context("Failed to open stdin pipe for child")?;
        stdin
            .write_all(data.as_bytes())
            .with_context(|| format!("Failed writing stdin to '{}'", program))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("Failed waiting for '{}'", program))?;

    {
        let registry = ChildRegistry::global();
        let mut guard = registry.lock().expect("ChildRegistry mutex poisoned");
        guard.unregister(pid);
    }

    let result = ToolOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };

    if result.success {
        info!("{} completed", program);
    } else {
        info!(
            "{} failed with exit code {}",
            program,
            result.exit_code.unwrap_or(-1)
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_captures_stdout() {
        let out = run_probe("echo", &["hello"]).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_failure_includes_stderr() {
        let out = run_probe("ls", &["/nonexistent_path_12345"]).unwrap();
        assert!(!out.success);

        let err = out.ensure_success("listing").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("listing failed"));
    }

    #[test]
    fn test_stdin_piping() {
        // cat with piped stdin echoes the secret back on stdout but the
        // runner never logs it
        let out = run_tool_with_stdin("cat", &[], "s3cret\n").unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "s3cret\n");
    }

    #[test]
    fn test_missing_program_errors() {
        let result = run_probe("definitely_not_a_real_tool_12345", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ensure_success_ok() {
        let out = ToolOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        };
        out.ensure_success("anything").unwrap();
    }
}
