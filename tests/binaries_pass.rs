// tests/binaries_pass.rs

//! Tool binary mirroring against an in-process mock of the releases site.

mod common;

use common::{
    archive_name, spawn_registry, spawn_releases, zip_bytes, MockProvider, MockRegistry,
    MockReleases,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tf_mirror::downloader::{DownloaderConfig, DownloaderService};
use tokio_util::sync::CancellationToken;

fn fixture_registry() -> MockRegistry {
    let mut archives = HashMap::new();
    archives.insert(
        archive_name("thing", "1.0.0", "linux", "amd64"),
        zip_bytes("terraform-provider-thing", b"binary"),
    );
    MockRegistry {
        providers: vec![MockProvider {
            namespace: "acme".to_string(),
            name: "thing".to_string(),
            versions: vec!["1.0.0".to_string()],
        }],
        archives,
        ..Default::default()
    }
}

fn fixture_releases() -> MockReleases {
    let mut archives = HashMap::new();
    for version in ["1.14.0", "1.15.0", "1.16.0"] {
        archives.insert(
            format!("consul_{version}_linux_amd64.zip"),
            b"consul binary".to_vec(),
        );
    }
    MockReleases {
        tools: HashMap::from([(
            "consul".to_string(),
            vec![
                "1.16.0".to_string(),
                "1.15.0".to_string(),
                "1.14.0".to_string(),
            ],
        )]),
        archives,
    }
}

fn config(store: &Path, registry_url: &str, releases_url: &str) -> DownloaderConfig {
    let mut config = DownloaderConfig::new(store);
    config.registry_url = registry_url.to_string();
    config.releases_url = releases_url.to_string();
    config.provider_filter = "acme/thing".to_string();
    config.platform_filter = "linux_amd64".to_string();
    config.download_binaries = "consul>1.15.0".to_string();
    config.download_timeout = Duration::from_secs(10);
    config
}

#[tokio::test]
async fn binaries_pass_applies_minimum_version_and_platforms() {
    let store = tempfile::tempdir().unwrap();
    let (registry_url, _state) = spawn_registry(fixture_registry()).await;
    let releases_url = spawn_releases(fixture_releases()).await;

    let service =
        DownloaderService::new(config(store.path(), &registry_url, &releases_url)).unwrap();
    service.run_cycle(&CancellationToken::new()).await.unwrap();

    let tool_dir = store.path().join("consul");
    assert!(tool_dir.join("consul_1.15.0_linux_amd64.zip").exists());
    assert!(tool_dir.join("consul_1.16.0_linux_amd64.zip").exists());
    assert!(!tool_dir.join("consul_1.14.0_linux_amd64.zip").exists());

    let info = service.metadata().binary("consul").unwrap();
    assert_eq!(info.versions, vec!["1.15.0", "1.16.0"]);
    assert_eq!(info.platforms, vec!["linux_amd64"]);
}

#[tokio::test]
async fn binaries_pass_skips_existing_archives() {
    let store = tempfile::tempdir().unwrap();
    let (registry_url, _state) = spawn_registry(fixture_registry()).await;
    let releases_url = spawn_releases(fixture_releases()).await;

    let tool_dir = store.path().join("consul");
    std::fs::create_dir_all(&tool_dir).unwrap();
    std::fs::write(tool_dir.join("consul_1.15.0_linux_amd64.zip"), b"preexisting").unwrap();

    let service =
        DownloaderService::new(config(store.path(), &registry_url, &releases_url)).unwrap();
    service.run_cycle(&CancellationToken::new()).await.unwrap();

    // The pre-existing archive is left untouched and still recorded.
    assert_eq!(
        std::fs::read(tool_dir.join("consul_1.15.0_linux_amd64.zip")).unwrap(),
        b"preexisting"
    );
    let info = service.metadata().binary("consul").unwrap();
    assert_eq!(info.versions, vec!["1.15.0", "1.16.0"]);
}

#[tokio::test]
async fn malformed_binaries_filter_does_not_abort_cycle() {
    let store = tempfile::tempdir().unwrap();
    let (registry_url, _state) = spawn_registry(fixture_registry()).await;
    let releases_url = spawn_releases(fixture_releases()).await;

    let mut config = config(store.path(), &registry_url, &releases_url);
    config.download_binaries = "consul".to_string();
    let service = DownloaderService::new(config).unwrap();
    let summary = service.run_cycle(&CancellationToken::new()).await.unwrap();

    // Providers were still mirrored; the bad filter is logged and skipped.
    assert_eq!(summary.downloaded, 1);
    assert!(!store.path().join("consul").exists());
}
