// src/version.rs

//! Tolerant version parsing and build metadata.
//!
//! Upstream version strings are not always strict semver: the registry and
//! the releases site publish values like `1.6`, `v1.6.0` or `1.6.0-rc1`.
//! `parse_tolerant` normalizes these before comparison.

use semver::Version;
use serde::Serialize;

/// Parse a version string leniently into a semver [`Version`].
///
/// Accepts an optional leading `v`/`V` and pads missing minor/patch
/// components with zeros. Pre-release and build metadata are preserved.
/// Returns `None` for strings that cannot be normalized.
pub fn parse_tolerant(input: &str) -> Option<Version> {
    let s = input.trim();
    let s = s
        .strip_prefix('v')
        .or_else(|| s.strip_prefix('V'))
        .unwrap_or(s);
    if s.is_empty() {
        return None;
    }

    if let Ok(v) = Version::parse(s) {
        return Some(v);
    }

    // Pad a short numeric core ("1" or "1.6") out to major.minor.patch,
    // keeping any pre-release/build suffix attached.
    let split = s.find(['-', '+']).unwrap_or(s.len());
    let (core, rest) = s.split_at(split);
    let mut padded = core.to_string();
    for _ in core.matches('.').count()..2 {
        padded.push_str(".0");
    }
    padded.push_str(rest);

    Version::parse(&padded).ok()
}

/// Build-time metadata reported by `--version` and the `/version` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_time: String,
    pub rust_version: String,
    pub platform: String,
}

impl BuildInfo {
    /// Metadata stamped into the binary by the build script
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: env!("TF_MIRROR_COMMIT").to_string(),
            build_time: env!("TF_MIRROR_BUILD_TIME").to_string(),
            rust_version: env!("TF_MIRROR_RUSTC").to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }
}

/// Short version string for logs: `<version>-<abbrev commit>` when the
/// commit is known, the bare package version otherwise.
pub fn version_string() -> String {
    let commit = env!("TF_MIRROR_COMMIT");
    if commit != "unknown" && commit.len() > 7 {
        format!("{}-{}", env!("CARGO_PKG_VERSION"), &commit[..7])
    } else {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_semver() {
        let v = parse_tolerant("1.6.0").unwrap();
        assert_eq!(v, Version::new(1, 6, 0));
    }

    #[test]
    fn strips_v_prefix() {
        assert_eq!(parse_tolerant("v1.6.0").unwrap(), Version::new(1, 6, 0));
        assert_eq!(parse_tolerant("V2.0.1").unwrap(), Version::new(2, 0, 1));
    }

    #[test]
    fn pads_short_versions() {
        assert_eq!(parse_tolerant("1.6").unwrap(), Version::new(1, 6, 0));
        assert_eq!(parse_tolerant("3").unwrap(), Version::new(3, 0, 0));
    }

    #[test]
    fn keeps_prerelease() {
        let v = parse_tolerant("1.6.0-rc1").unwrap();
        assert_eq!(v.pre.as_str(), "rc1");
        assert!(v < Version::new(1, 6, 0));

        let short = parse_tolerant("1.6-rc1").unwrap();
        assert_eq!(short.pre.as_str(), "rc1");
        assert_eq!((short.major, short.minor, short.patch), (1, 6, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_tolerant("").is_none());
        assert!(parse_tolerant("not-a-version").is_none());
        assert!(parse_tolerant("v").is_none());
    }
}
