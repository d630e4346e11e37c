// src/registry.rs

//! Typed client for the upstream provider registry.
//!
//! Wraps [`HttpClient`] with the four operations the downloader needs:
//! paginated provider discovery, version listing, per-platform package
//! metadata, and streaming archive download. Also owns the path scheme of
//! the on-disk store.

use crate::client::HttpClient;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The public Terraform registry
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.terraform.io";

/// Registry pagination page size
const PAGE_LIMIT: usize = 100;

/// Hostname directory the provider tree lives under, per the Network Mirror
/// protocol layout
pub const REGISTRY_HOST_DIR: &str = "registry.terraform.io";

/// One provider in the registry listing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderListItem {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderListPage {
    #[serde(default)]
    providers: Vec<ProviderListItem>,
}

/// Response of the provider versions endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderVersions {
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
}

/// One version in a [`ProviderVersions`] response
#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(default)]
    pub platforms: Vec<PlatformRef>,
}

/// A platform advertised for a version
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformRef {
    pub os: String,
    pub arch: String,
}

/// Package metadata for one `(provider, version, platform)` tuple
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPackage {
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    #[serde(default)]
    pub shasums_url: String,
    #[serde(default)]
    pub shasums_signature_url: String,
    #[serde(default)]
    pub shasum: String,
    #[serde(default)]
    pub signing_keys: SigningKeys,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SigningKeys {
    #[serde(default)]
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpgPublicKey {
    #[serde(default)]
    pub key_id: String,
    #[serde(default)]
    pub ascii_armor: String,
}

/// Client for the upstream registry API
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: HttpClient,
    base_url: String,
}

impl RegistryClient {
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Enumerate every provider the registry knows about.
    ///
    /// Pages through `/v1/providers` until a page comes back short or empty,
    /// preserving upstream order.
    pub async fn discover_all_providers(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProviderListItem>> {
        let mut all = Vec::new();
        let mut offset = 0usize;

        loop {
            let url = format!(
                "{}/v1/providers?offset={offset}&limit={PAGE_LIMIT}",
                self.base_url
            );
            debug!("fetching provider list page at offset {offset}");

            let response = self.client.get(&url, cancel).await?;
            if response.status().as_u16() != 200 {
                return Err(Error::Protocol(response.status().as_u16()));
            }

            let page: ProviderListPage = response.json().await?;
            if page.providers.is_empty() {
                break;
            }

            let count = page.providers.len();
            all.extend(page.providers);
            if count < PAGE_LIMIT {
                break;
            }
            offset += PAGE_LIMIT;
        }

        Ok(all)
    }

    /// List all versions of one provider
    pub async fn provider_versions(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderVersions> {
        let url = format!("{}/v1/providers/{namespace}/{name}/versions", self.base_url);

        let response = self.client.get(&url, cancel).await?;
        match response.status().as_u16() {
            200 => Ok(response.json().await?),
            404 => Err(Error::NotFound(format!("provider {namespace}/{name}"))),
            status => Err(Error::Protocol(status)),
        }
    }

    /// Fetch package metadata for one `(provider, version, platform)` tuple
    pub async fn provider_package(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        os: &str,
        arch: &str,
        cancel: &CancellationToken,
    ) -> Result<ProviderPackage> {
        let url = format!(
            "{}/v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}",
            self.base_url
        );

        let response = self.client.get(&url, cancel).await?;
        match response.status().as_u16() {
            200 => Ok(response.json().await?),
            404 => Err(Error::NotFound(format!(
                "provider package {namespace}/{name} {version} {os}/{arch}"
            ))),
            status => Err(Error::Protocol(status)),
        }
    }

    /// URL of the per-version metadata document cached next to the archives
    pub fn version_metadata_url(&self, namespace: &str, name: &str, version: &str) -> String {
        format!("{}/v1/providers/{namespace}/{name}/{version}.json", self.base_url)
    }

    /// Stream a URL into `dest_path` through the atomic-write protocol.
    ///
    /// A non-200 response fails without touching the filesystem; a failure
    /// mid-stream removes the temp file.
    pub async fn download_file(
        &self,
        url: &str,
        dest_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.client.download_to_path(url, dest_path, cancel).await
    }
}

/// Directory of one provider: `<base>/registry.terraform.io/<ns>/<name>`
pub fn provider_dir(base: &Path, namespace: &str, name: &str) -> PathBuf {
    base.join(REGISTRY_HOST_DIR).join(namespace).join(name)
}

/// Final path of a provider archive inside the store.
/// All versions and platforms of a provider share one directory.
pub fn provider_path(base: &Path, namespace: &str, name: &str, filename: &str) -> PathBuf {
    provider_dir(base, namespace, name).join(filename)
}

/// Path of the cached per-version metadata document
pub fn version_json_path(base: &Path, namespace: &str, name: &str, version: &str) -> PathBuf {
    provider_dir(base, namespace, name).join(format!("{version}.json"))
}

/// Canonical archive filename for a job tuple
pub fn provider_filename(name: &str, version: &str, os: &str, arch: &str) -> String {
    format!("terraform-provider-{name}_{version}_{os}_{arch}.zip")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_paths_follow_mirror_layout() {
        let base = Path::new("/data");
        assert_eq!(
            provider_path(base, "acme", "thing", "terraform-provider-thing_1.0.0_linux_amd64.zip"),
            Path::new("/data/registry.terraform.io/acme/thing/terraform-provider-thing_1.0.0_linux_amd64.zip")
        );
        assert_eq!(
            version_json_path(base, "acme", "thing", "1.0.0"),
            Path::new("/data/registry.terraform.io/acme/thing/1.0.0.json")
        );
    }

    #[test]
    fn archive_filename_format() {
        assert_eq!(
            provider_filename("aws", "5.31.0", "linux", "amd64"),
            "terraform-provider-aws_5.31.0_linux_amd64.zip"
        );
    }

    #[test]
    fn package_metadata_deserializes_with_missing_fields() {
        let pkg: ProviderPackage = serde_json::from_str(
            r#"{"filename":"terraform-provider-thing_1.0.0_linux_amd64.zip",
                "download_url":"https://example.com/archive.zip"}"#,
        )
        .unwrap();
        assert_eq!(pkg.shasum, "");
        assert!(pkg.signing_keys.gpg_public_keys.is_empty());
    }
}
