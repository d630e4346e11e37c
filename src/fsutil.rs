// src/fsutil.rs

//! Atomic file materialization and store probing helpers.
//!
//! Every file written into the mirror store goes through the temp-file plus
//! rename sequence in this module; no other code path opens a final-named
//! file for writing.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Temp-file sibling for an in-flight write: `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut os = OsString::from(path.as_os_str());
    os.push(".tmp");
    PathBuf::from(os)
}

/// Create the parent directory of `path` (mode 0755 on Unix)
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Promote a temp file to its final name, unlinking the temp file when the
/// rename fails so no orphan survives.
pub fn rename_into_place(tmp: &Path, dest: &Path) -> Result<()> {
    if let Err(e) = fs::rename(tmp, dest) {
        let _ = fs::remove_file(tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Write `bytes` to `path` atomically: parent mkdir, temp write, close,
/// rename. The temp file is removed on any failure.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    let tmp = tmp_path(path);
    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    rename_into_place(&tmp, path)
}

pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

/// True for an existing regular file with at least one byte
pub fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Verify the SHA-256 checksum of a file against an expected hex digest.
///
/// An empty expectation degrades to a pure existence check: upstream does
/// not publish checksums for every artifact kind.
pub fn verify_checksum(path: &Path, expected_hex: &str) -> Result<()> {
    if expected_hex.is_empty() {
        debug!("no expected checksum for {}, checking existence only", path.display());
        if file_exists(path) {
            return Ok(());
        }
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    if !is_non_empty_file(path) {
        return Err(Error::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected_hex.to_string(),
            actual: "<missing or empty file>".to_string(),
        });
    }

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let actual = format!("{:x}", hasher.finalize());

    if !actual.eq_ignore_ascii_case(expected_hex) {
        return Err(Error::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected_hex.to_string(),
            actual,
        });
    }

    debug!("checksum verified for {}", path.display());
    Ok(())
}

/// Probe a provider directory for an already-materialized archive.
///
/// Matches any entry starting with
/// `terraform-provider-<name>_<version>_<os>_<arch>` that is neither a
/// signature file nor a SHA256SUMS document.
pub fn archive_present(provider_dir: &Path, name: &str, version: &str, os: &str, arch: &str) -> bool {
    let prefix = format!("terraform-provider-{name}_{version}_{os}_{arch}");

    let Ok(entries) = fs::read_dir(provider_dir) else {
        return false;
    };

    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with(&prefix)
            && !file_name.ends_with(".sig")
            && !file_name.contains("SHA256SUMS")
            && !file_name.ends_with(".tmp")
        {
            return true;
        }
    }

    false
}

/// Split a provider archive filename into `(name, version, os, arch)`.
///
/// Expects `terraform-provider-<name>_<version>_<os>_<arch>.zip`; returns
/// `None` for anything else.
pub fn parse_archive_name(filename: &str) -> Option<(String, String, String, String)> {
    let base = filename
        .strip_prefix("terraform-provider-")?
        .strip_suffix(".zip")?;
    let parts: Vec<&str> = base.split('_').collect();
    if parts.len() < 4 {
        return None;
    }
    Some((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
        parts[3].to_string(),
    ))
}
