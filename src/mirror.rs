//! Artifact Resolver: find the current bootstrap archive on a mirror.
//!
//! Candidates are supplied as ordered configuration data and probed
//! sequentially; first success wins, no ranking or merging across mirrors.
//! Each mirror publishes a latest-pointer resource (the checksum listing
//! next to the bootstrap archive); the first non-comment, non-separator
//! record naming a `-<variant>.tar.zst` file identifies the archive.

use crate::error::{InstallError, Result};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Relative path of the latest-pointer resource on every mirror.
pub const LATEST_POINTER_PATH: &str = "iso/latest/sha256sums.txt";

/// Canonical source tried after all configured candidates fail.
pub const CANONICAL_MIRROR: &str = "https://geo.mirror.pkgbuild.com/";

/// Surfaced as a manual-intervention hint when resolution fails entirely.
/// Never substituted silently.
pub const LAST_KNOWN_GOOD: &str =
    "https://geo.mirror.pkgbuild.com/iso/latest/archlinux-bootstrap-x86_64.tar.zst";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One alternative network location believed to host the bootstrap archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorCandidate {
    /// Base URL, e.g. "https://mirror.example.org/archlinux/".
    pub base_url: String,
}

impl MirrorCandidate {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

/// Default candidate list shipped as data; replaceable via --mirror flags.
pub fn default_mirrors() -> Vec<MirrorCandidate> {
    vec![
        MirrorCandidate::new("https://mirror.rackspace.com/archlinux/"),
        MirrorCandidate::new("https://mirrors.kernel.org/archlinux/"),
        MirrorCandidate::new("https://ftp.halifax.rwth-aachen.de/archlinux/"),
    ]
}

/// Resolve the download URL of the current bootstrap archive.
///
/// Iterates candidates in priority order, then the canonical source. Pure
/// apart from the network probes: resolving twice without network state
/// change yields the same URL.
pub fn resolve_artifact(candidates: &[MirrorCandidate], variant: &str) -> Result<String> {
    let client = Client::builder()
        .connect_timeout(PROBE_TIMEOUT)
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| InstallError::resolution(format!("HTTP client setup failed: {}", e)))?;

    for candidate in candidates {
        match resolve_candidate(&client, &candidate.base_url, variant) {
            Some(url) => {
                info!("resolved artifact via {}: {}", candidate.base_url, url);
                return Ok(url);
            }
            None => {
                warn!("mirror {} did not resolve, trying next", candidate.base_url);
            }
        }
    }

    info!("all candidates failed, trying canonical source");
    if let Some(url) = resolve_candidate(&client, CANONICAL_MIRROR, variant) {
        return Ok(url);
    }

    Err(InstallError::resolution(format!(
        "no mirror yielded a valid artifact URL for variant '{}'; \
         last known good (manual download): {}",
        variant, LAST_KNOWN_GOOD
    )))
}

/// Probe one candidate and parse its latest pointer. Network errors and
/// parse misses both yield None so iteration moves on.
fn resolve_candidate(client: &Client, base_url: &str, variant: &str) -> Option<String> {
    let pointer_url = join_url(base_url, LATEST_POINTER_PATH);
    debug!("probing {}", pointer_url);

    let response = match client.get(&pointer_url).send() {
        Ok(r) => r,
        Err(e) => {
            debug!("probe of {} failed: {}", pointer_url, e);
            return None;
        }
    };

    if !response.status().is_success() {
        debug!("probe of {} returned {}", pointer_url, response.status());
        return None;
    }

    let body = response.text().ok()?;
    let name = parse_latest_pointer(&body, variant)?;

    Some(join_url(base_url, &format!("iso/latest/{}", name)))
}

/// Parse a latest-pointer listing and return the archive file name.
///
/// Records are newline-separated; `#` lines are comments, dash runs are
/// separators, the file name is the last whitespace field of a record. The
/// first record naming a `-<variant>.tar.zst` file wins.
pub(crate) fn parse_latest_pointer(body: &str, variant: &str) -> Option<String> {
    let wanted_suffix = format!("-{}.tar.zst", variant);

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.chars().all(|c| c == '-') {
            continue;
        }

        let name = line.split_whitespace().last()?;
        // Checksum listings prefix names with '*' in binary mode
        let name = name.trim_start_matches('*');
        if name.ends_with(&wanted_suffix) {
            return Some(name.to_string());
        }
    }

    None
}

fn join_url(base: &str, relative: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), relative)
}
