//! Artifact Acquirer: download, verify and extract the bootstrap archive.
//!
//! Downloads with bounded retries, then gates acceptance on size and
//! content inspection before anything touches the target tree. Mirrors
//! behind captive portals or returning HTML error pages with a 200 status
//! are the common failure here; a small textual file with the right name is
//! an error page, not an archive.

use crate::error::{InstallError, Result};
use crate::runner;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Heuristic floor for a plausible base-image archive.
pub const MIN_ARCHIVE_BYTES: u64 = 64 * 1024 * 1024;

/// Directories any sane base image provides at top level. Missing entries
/// are reported, not fatal, since extraction may legitimately omit optional
/// content.
pub const EXPECTED_TOPLEVEL: &[&str] = &["etc", "usr", "var"];

const DOWNLOAD_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1800);

/// Result of one acquisition attempt. Always surfaced to the coordinator,
/// never silently discarded.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Archive downloaded and passed the acceptance gate.
    Success(PathBuf),
    /// Transient failure (network error, bad status); worth another attempt.
    RetryableFailure(String),
    /// The downloaded bytes can never become valid (error page, truncated
    /// archive); retrying the same transfer is pointless.
    FatalFailure(String),
}

/// Compressed-archive classification by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentKind {
    Zstd,
    Gzip,
    Xz,
    Text,
    Unknown,
}

/// Download `url` into `destination_dir` with bounded retries.
///
/// On failure no partial file is left behind.
pub fn acquire(url: &str, destination_dir: &Path) -> Result<PathBuf> {
    acquire_with(url, destination_dir, DOWNLOAD_ATTEMPTS, RETRY_DELAY)
}

fn acquire_with(
    url: &str,
    destination_dir: &Path,
    attempts: u32,
    retry_delay: Duration,
) -> Result<PathBuf> {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| InstallError::acquisition(format!("URL has no file name: {}", url)))?;
    let dest_path = destination_dir.join(file_name);

    fs::create_dir_all(destination_dir)?;

    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| InstallError::acquisition(format!("HTTP client setup failed: {}", e)))?;

    for attempt in 1..=attempts {
        info!("download attempt {}/{}: {}", attempt, attempts, url);

        match download_once(&client, url, &dest_path) {
            DownloadOutcome::Success(path) => return Ok(path),
            DownloadOutcome::FatalFailure(reason) => {
                discard_partial(&dest_path);
                return Err(InstallError::acquisition(reason));
            }
            DownloadOutcome::RetryableFailure(reason) => {
                warn!("attempt {} failed: {}", attempt, reason);
                discard_partial(&dest_path);
                if attempt < attempts {
                    std::thread::sleep(retry_delay);
                }
            }
        }
    }

    Err(InstallError::acquisition(format!(
        "download failed after {} attempts: {}",
        attempts, url
    )))
}

fn download_once(client: &Client, url: &str, dest_path: &Path) -> DownloadOutcome {
    let mut response = match client.get(url).send() {
        Ok(r) => r,
        Err(e) => return DownloadOutcome::RetryableFailure(format!("request failed: {}", e)),
    };

    if !response.status().is_success() {
        return DownloadOutcome::RetryableFailure(format!(
            "server returned {} for {}",
            response.status(),
            url
        ));
    }

    let mut file = match File::create(dest_path) {
        Ok(f) => f,
        Err(e) => return DownloadOutcome::FatalFailure(format!("cannot create file: {}", e)),
    };

    if let Err(e) = response.copy_to(&mut file) {
        return DownloadOutcome::RetryableFailure(format!("transfer interrupted: {}", e));
    }
    drop(file);

    match verify_archive(dest_path) {
        Ok(()) => DownloadOutcome::Success(dest_path.to_path_buf()),
        Err(e) => DownloadOutcome::FatalFailure(e.to_string()),
    }
}

fn discard_partial(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

/// Acceptance gate: the file must exist, exceed the size floor, and carry a
/// compressed-archive signature. Undersized textual content is classified
/// as an error page.
pub(crate) fn verify_archive(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path).map_err(|e| {
        InstallError::acquisition(format!("downloaded file missing: {}", e))
    })?;

    let kind = classify_file(path)?;

    if metadata.len() < MIN_ARCHIVE_BYTES {
        if kind == ContentKind::Text {
            return Err(InstallError::acquisition(format!(
                "integrity check failed: {} is a textual error page ({} bytes), not an archive",
                path.display(),
                metadata.len()
            )));
        }
        return Err(InstallError::acquisition(format!(
            "integrity check failed: {} is {} bytes, below the {} byte floor",
            path.display(),
            metadata.len(),
            MIN_ARCHIVE_BYTES
        )));
    }

    match kind {
        ContentKind::Zstd | ContentKind::Gzip | ContentKind::Xz => Ok(()),
        other => Err(InstallError::acquisition(format!(
            "integrity check failed: {} is not a compressed archive (detected {:?})",
            path.display(),
            other
        ))),
    }
}

fn classify_file(path: &Path) -> Result<ContentKind> {
    let mut header = [0u8; 512];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    Ok(classify(&header[..read]))
}

pub(crate) fn classify(header: &[u8]) -> ContentKind {
    if header.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
        return ContentKind::Zstd;
    }
    if header.starts_with(&[0x1F, 0x8B]) {
        return ContentKind::Gzip;
    }
    if header.starts_with(&[0xFD, b'7', b'z', b'X', b'Z', 0x00]) {
        return ContentKind::Xz;
    }
    if !header.is_empty()
        && header
            .iter()
            .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..0x7F).contains(&b))
    {
        return ContentKind::Text;
    }
    ContentKind::Unknown
}

/// Extract the archive into the target tree, preserving ownership and
/// extended attributes, then check the expected top-level layout.
pub fn extract(archive: &Path, target: &Path) -> Result<()> {
    let archive_str = archive.to_string_lossy();
    let target_str = target.to_string_lossy();

    info!("extracting {} into {}", archive_str, target_str);
    let output = runner::run_tool(
        "bsdtar",
        &[
            "-x",
            "-p",
            "-f",
            &archive_str,
            "-C",
            &target_str,
            "--numeric-owner",
            "--strip-components",
            "1",
        ],
    )
    .map_err(|e| InstallError::acquisition(format!("extraction spawn failed: {:#}", e)))?;

    output
        .ensure_success("archive extraction")
        .map_err(|e| InstallError::acquisition(format!("{:#}", e)))?;

    if !runner::is_dry_run() {
        for missing in missing_toplevel(target) {
            warn!("extracted tree is missing expected directory: {}", missing);
        }
    }

    Ok(())
}

/// Which of the expected top-level directories are absent.
pub(crate) fn missing_toplevel(target: &Path) -> Vec<&'static str> {
    EXPECTED_TOPLEVEL
        .iter()
        .copied()
        .filter(|dir| !target.join(dir).is_dir())
        .collect()
}
