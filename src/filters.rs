// src/filters.rs

//! Provider, platform and binary filter parsing.
//!
//! Filters are comma-separated lists supplied on the command line or via the
//! environment. An empty filter string produces a disabled filter whose
//! `should_include` accepts everything; a malformed entry is a configuration
//! error, never a silently-empty filter.

use crate::error::{Error, Result};
use crate::version::parse_tolerant;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

/// One entry of a provider filter: `namespace/name` with an optional
/// minimum version (`namespace/name>1.2.0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFilterItem {
    pub namespace: String,
    pub name: String,
    /// Empty when no minimum version was given
    pub min_version: String,
}

/// Filter restricting which providers are mirrored
#[derive(Debug, Default)]
pub struct ProviderFilter {
    providers: BTreeMap<String, ProviderFilterItem>,
}

impl ProviderFilter {
    /// Parse a comma-separated filter string like
    /// `hashicorp/aws,hashicorp/helm>2.9.0`.
    pub fn parse(filter: &str) -> Result<Self> {
        let mut providers = BTreeMap::new();

        for entry in filter.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (provider, min_version) = match entry.split_once('>') {
                Some((p, v)) => (p.trim(), v.trim()),
                None => (entry, ""),
            };

            let (namespace, name) = provider.split_once('/').ok_or_else(|| {
                Error::ConfigInvalid(format!(
                    "invalid provider filter entry '{entry}', expected 'namespace/name' or 'namespace/name>version'"
                ))
            })?;
            if namespace.is_empty() || name.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "invalid provider filter entry '{entry}', expected 'namespace/name' or 'namespace/name>version'"
                )));
            }

            providers.insert(
                format!("{namespace}/{name}"),
                ProviderFilterItem {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    min_version: min_version.to_string(),
                },
            );
        }

        Ok(Self { providers })
    }

    /// True when at least one entry was configured
    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Whether the given provider passes the filter. A disabled filter
    /// includes everything.
    pub fn should_include(&self, namespace: &str, name: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.providers.contains_key(&format!("{namespace}/{name}"))
    }

    /// Minimum version configured for a provider, or `""` when unset
    pub fn min_version(&self, namespace: &str, name: &str) -> &str {
        self.providers
            .get(&format!("{namespace}/{name}"))
            .map(|item| item.min_version.as_str())
            .unwrap_or("")
    }

    /// Configured filter entries
    pub fn items(&self) -> impl Iterator<Item = &ProviderFilterItem> {
        self.providers.values()
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }
}

impl fmt::Display for ProviderFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_enabled() {
            return write!(f, "all providers");
        }
        let keys: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        write!(f, "{}", keys.join(", "))
    }
}

/// Filter restricting which platforms are mirrored
#[derive(Debug, Default)]
pub struct PlatformFilter {
    platforms: BTreeSet<String>,
}

impl PlatformFilter {
    /// Parse a comma-separated filter string like `linux_amd64,darwin_arm64`.
    pub fn parse(filter: &str) -> Result<Self> {
        let mut platforms = BTreeSet::new();

        for entry in filter.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            match entry.split_once('_') {
                Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('_') => {
                    platforms.insert(entry.to_string());
                }
                _ => {
                    return Err(Error::ConfigInvalid(format!(
                        "invalid platform filter entry '{entry}', expected 'os_arch'"
                    )));
                }
            }
        }

        Ok(Self { platforms })
    }

    pub fn is_enabled(&self) -> bool {
        !self.platforms.is_empty()
    }

    /// Whether the given platform passes the filter. A disabled filter
    /// includes everything.
    pub fn should_include(&self, os: &str, arch: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.platforms.contains(&format!("{os}_{arch}"))
    }

    pub fn count(&self) -> usize {
        self.platforms.len()
    }
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_enabled() {
            return write!(f, "all platforms");
        }
        let keys: Vec<&str> = self.platforms.iter().map(String::as_str).collect();
        write!(f, "{}", keys.join(", "))
    }
}

/// One entry of a binary filter: tool plus required minimum version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFilterItem {
    pub tool: String,
    pub min_version: String,
}

/// Parse a binaries filter string like `consul>1.15.0,nomad>1.6.0`.
/// Both the tool and the minimum version are required for every entry.
pub fn parse_binary_filter(filter: &str) -> Result<Vec<BinaryFilterItem>> {
    let mut items = Vec::new();

    for entry in filter.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        match entry.split_once('>') {
            Some((tool, min_version))
                if !tool.trim().is_empty() && !min_version.trim().is_empty() =>
            {
                items.push(BinaryFilterItem {
                    tool: tool.trim().to_string(),
                    min_version: min_version.trim().to_string(),
                });
            }
            _ => {
                return Err(Error::ConfigInvalid(format!(
                    "invalid binary filter entry '{entry}', expected 'tool>version'"
                )));
            }
        }
    }

    Ok(items)
}

/// Keep only versions `>= min_version` under tolerant semver comparison.
///
/// An empty minimum returns the input unchanged. An unparseable minimum also
/// returns the input unchanged (logged as a warning); unparseable candidates
/// are dropped.
pub fn filter_versions_by_min(versions: &[String], min_version: &str) -> Vec<String> {
    if min_version.is_empty() {
        return versions.to_vec();
    }

    let Some(min) = parse_tolerant(min_version) else {
        warn!("unparseable minimum version '{min_version}', keeping all versions");
        return versions.to_vec();
    };

    versions
        .iter()
        .filter(|v| parse_tolerant(v).is_some_and(|parsed| parsed >= min))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn provider_filter_parses_entries() {
        let filter = ProviderFilter::parse("hashicorp/aws, acme/thing>1.1.0").unwrap();
        assert!(filter.is_enabled());
        assert_eq!(filter.count(), 2);
        assert!(filter.should_include("hashicorp", "aws"));
        assert!(filter.should_include("acme", "thing"));
        assert!(!filter.should_include("acme", "other"));
        assert_eq!(filter.min_version("acme", "thing"), "1.1.0");
        assert_eq!(filter.min_version("hashicorp", "aws"), "");
    }

    #[test]
    fn empty_provider_filter_includes_everything() {
        let filter = ProviderFilter::parse("").unwrap();
        assert!(!filter.is_enabled());
        assert!(filter.should_include("anything", "at-all"));
        assert_eq!(filter.to_string(), "all providers");
    }

    #[test]
    fn provider_filter_rejects_malformed_entries() {
        assert!(ProviderFilter::parse("no-slash").is_err());
        assert!(ProviderFilter::parse("/name").is_err());
        assert!(ProviderFilter::parse("namespace/").is_err());
        assert!(ProviderFilter::parse("a/b,bad").is_err());
    }

    #[test]
    fn provider_filter_ignores_empty_entries() {
        let filter = ProviderFilter::parse(" , hashicorp/aws ,, ").unwrap();
        assert_eq!(filter.count(), 1);
    }

    #[test]
    fn platform_filter_parses_and_matches() {
        let filter = PlatformFilter::parse("linux_amd64,darwin_arm64").unwrap();
        assert!(filter.is_enabled());
        assert!(filter.should_include("linux", "amd64"));
        assert!(!filter.should_include("windows", "amd64"));
    }

    #[test]
    fn platform_filter_rejects_malformed_entries() {
        assert!(PlatformFilter::parse("linuxamd64").is_err());
        assert!(PlatformFilter::parse("_amd64").is_err());
        assert!(PlatformFilter::parse("linux_").is_err());
        assert!(PlatformFilter::parse("linux_amd_64").is_err());
    }

    #[test]
    fn binary_filter_requires_both_sides() {
        let items = parse_binary_filter("consul>1.15.0, nomad>1.6.0").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].tool, "consul");
        assert_eq!(items[0].min_version, "1.15.0");

        assert!(parse_binary_filter("consul").is_err());
        assert!(parse_binary_filter("consul>").is_err());
        assert!(parse_binary_filter(">1.0.0").is_err());
    }

    #[test]
    fn version_filtering_applies_minimum() {
        let all = versions(&["1.0.0", "1.1.0", "1.2.0"]);
        assert_eq!(
            filter_versions_by_min(&all, "1.1.0"),
            versions(&["1.1.0", "1.2.0"])
        );
    }

    #[test]
    fn version_filtering_is_idempotent() {
        let all = versions(&["0.9.0", "1.0.0", "2.0.0"]);
        let once = filter_versions_by_min(&all, "1.0.0");
        let twice = filter_versions_by_min(&once, "1.0.0");
        assert_eq!(once, twice);
    }

    #[test]
    fn version_filtering_permissive_fallbacks() {
        let all = versions(&["1.0.0", "garbage", "2.0.0"]);
        // Empty minimum keeps everything, including unparseable candidates.
        assert_eq!(filter_versions_by_min(&all, ""), all);
        // Unparseable minimum keeps everything too.
        assert_eq!(filter_versions_by_min(&all, "not-a-version"), all);
        // A real minimum drops unparseable candidates.
        assert_eq!(
            filter_versions_by_min(&all, "1.0.0"),
            versions(&["1.0.0", "2.0.0"])
        );
    }
}
