// src/downloader/binaries.rs

//! Tool binary mirroring from the HashiCorp releases site.
//!
//! The releases site publishes no JSON API for version listings, so the
//! available versions of a tool are scraped from its HTML index page. No
//! checksums are published either; verification is limited to HTTP 200 and
//! a non-empty body.

use crate::client::HttpClient;
use crate::error::{Error, Result};
use crate::filters::{filter_versions_by_min, BinaryFilterItem};
use crate::fsutil;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The public HashiCorp releases site
pub const DEFAULT_RELEASES_URL: &str = "https://releases.hashicorp.com";

/// What one binaries pass downloaded (or found present) for a single tool
#[derive(Debug, Clone)]
pub struct BinaryDownloadSummary {
    pub tool: String,
    pub versions: Vec<String>,
    pub platforms: Vec<String>,
    pub downloaded: DateTime<Utc>,
}

/// Client for the releases site
#[derive(Debug, Clone)]
pub struct BinaryMirror {
    client: HttpClient,
    base_url: String,
    download_path: PathBuf,
}

impl BinaryMirror {
    pub fn new(client: HttpClient, base_url: impl Into<String>, download_path: impl Into<PathBuf>) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            download_path: download_path.into(),
        }
    }

    /// Scrape the versions listed on a tool's index page.
    ///
    /// Matches `href="/<tool>/X.Y.Z/"` links; pre-releases use a different
    /// link shape and are deliberately not picked up.
    pub async fn available_versions(
        &self,
        tool: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let url = format!("{}/{tool}/", self.base_url);
        let response = self.client.get(&url, cancel).await?;
        if response.status().as_u16() != 200 {
            return Err(Error::Protocol(response.status().as_u16()));
        }
        let body = response.text().await?;

        let pattern = format!(r#"href="/{}/([0-9]+\.[0-9]+\.[0-9]+)/""#, regex::escape(tool));
        let re = Regex::new(&pattern).map_err(|e| Error::Parse(format!("version regex: {e}")))?;

        let versions: Vec<String> = re
            .captures_iter(&body)
            .map(|c| c[1].to_string())
            .collect();
        debug!("found {} published versions for {tool}", versions.len());
        Ok(versions)
    }

    /// Mirror every filtered tool for the given platforms.
    ///
    /// Tools whose listing cannot be fetched are skipped with an error log;
    /// individual download failures are logged and do not stop the pass.
    pub async fn download_all(
        &self,
        filters: &[BinaryFilterItem],
        platforms: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<Vec<BinaryDownloadSummary>> {
        let mut summaries = Vec::new();
        let now = Utc::now();

        for filter in filters {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!(
                "processing tool {} (minimum version {})",
                filter.tool, filter.min_version
            );

            let versions = match self.available_versions(&filter.tool, cancel).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!("failed to list versions for {}: {e}", filter.tool);
                    continue;
                }
            };
            let versions = filter_versions_by_min(&versions, &filter.min_version);

            let mut got_versions: Vec<String> = Vec::new();
            let mut got_platforms: Vec<String> = Vec::new();

            for version in &versions {
                for (os, arch) in platforms {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }

                    let zip_name = format!("{}_{version}_{os}_{arch}.zip", filter.tool);
                    let dest = self.download_path.join(&filter.tool).join(&zip_name);

                    if fsutil::file_exists(&dest) {
                        debug!("already present, skipping {zip_name}");
                        record(&mut got_versions, version);
                        record(&mut got_platforms, &format!("{os}_{arch}"));
                        continue;
                    }

                    let url = format!("{}/{}/{version}/{zip_name}", self.base_url, filter.tool);
                    info!("downloading {url}");
                    match self.fetch_binary(&url, &dest, cancel).await {
                        Ok(()) => {
                            record(&mut got_versions, version);
                            record(&mut got_platforms, &format!("{os}_{arch}"));
                        }
                        Err(Error::Cancelled) => return Err(Error::Cancelled),
                        Err(e) => {
                            warn!("failed to download {zip_name}: {e}");
                        }
                    }
                }
            }

            if !got_versions.is_empty() {
                summaries.push(BinaryDownloadSummary {
                    tool: filter.tool.clone(),
                    versions: got_versions,
                    platforms: got_platforms,
                    downloaded: now,
                });
            }
        }

        Ok(summaries)
    }

    /// Download one binary archive; an empty body is treated as a failed
    /// download and removed.
    async fn fetch_binary(&self, url: &str, dest: &Path, cancel: &CancellationToken) -> Result<()> {
        self.client.download_to_path(url, dest, cancel).await?;

        if !fsutil::is_non_empty_file(dest) {
            let _ = std::fs::remove_file(dest);
            return Err(Error::Other(format!("empty response body from {url}")));
        }
        Ok(())
    }
}

fn record(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_regex_matches_release_index_links() {
        let body = r#"
            <a href="/consul/1.16.0/">consul_1.16.0</a>
            <a href="/consul/1.15.0/">consul_1.15.0</a>
            <a href="/consul/1.15.0-rc1/">consul_1.15.0-rc1</a>
            <a href="/nomad/1.6.0/">nomad_1.6.0</a>
        "#;
        let re = Regex::new(&format!(
            r#"href="/{}/([0-9]+\.[0-9]+\.[0-9]+)/""#,
            regex::escape("consul")
        ))
        .unwrap();
        let versions: Vec<&str> = re.captures_iter(body).map(|c| c.get(1).unwrap().as_str()).collect();
        assert_eq!(versions, vec!["1.16.0", "1.15.0"]);
    }
}
