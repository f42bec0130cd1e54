//! Error handling for zfsstrap.
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every pipeline failure maps to exactly one of these variants so the
//! coordinator can report the failing stage.

use thiserror::Error;

/// Main error type for the installer pipeline.
#[derive(Error, Debug)]
pub enum InstallError {
    /// IO errors (file operations, /proc parsing, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unresolvable configuration (unsupported device topology,
    /// bad plan file values)
    #[error("Input error: {0}")]
    Input(String),

    /// A storage provisioning step failed (partitioning, LUKS, pool, mounts)
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// No mirror candidate or fallback yielded a valid artifact URL
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Download, integrity or extraction failure after retries
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// A template placeholder lacked a binding at render time
    #[error("Render error: {0}")]
    Render(String),

    /// The chroot second-stage script exited non-zero
    #[error("Execution error: {0}")]
    Execution(String),

    /// Post-install unwind failed (swap, EFI unmount, final pool export)
    #[error("Teardown error: {0}")]
    Teardown(String),

    /// JSON serialization/deserialization errors (plan files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for installer operations.
pub type Result<T> = std::result::Result<T, InstallError>;

// Convenient error constructors
impl InstallError {
    /// Create an input error
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create a provisioning error
    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    /// Create a resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create an acquisition error
    pub fn acquisition(msg: impl Into<String>) -> Self {
        Self::Acquisition(msg.into())
    }

    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create an execution error
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a teardown error
    pub fn teardown(msg: impl Into<String>) -> Self {
        Self::Teardown(msg.into())
    }

    /// The pipeline stage this error belongs to, for fail-fast reporting.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Provisioning(_) => "storage-provisioning",
            Self::Resolution(_) => "artifact-resolution",
            Self::Acquisition(_) => "artifact-acquisition",
            Self::Render(_) => "target-configuration",
            Self::Execution(_) => "chroot-execution",
            Self::Teardown(_) => "teardown",
            Self::Io(_) | Self::Json(_) => "io",
        }
    }
}
