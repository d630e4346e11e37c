// src/downloader/mod.rs

//! Downloader service: periodic acquisition cycles against the upstream
//! registry.
//!
//! One cycle plans a deterministic job list (filters × versions × platforms
//! minus what is already on disk), fans it out over the worker pool, retries
//! timed-out jobs in a second pass, updates the journal, regenerates the
//! per-provider index documents, and optionally mirrors tool binaries.

pub mod binaries;
pub mod pool;

use crate::client::{HttpClient, HttpClientConfig};
use crate::error::{Error, Result};
use crate::filters::{parse_binary_filter, PlatformFilter, ProviderFilter};
use crate::fsutil;
use crate::indexgen;
use crate::metadata::MirrorMetadata;
use crate::registry::{self, ProviderListItem, RegistryClient};
use binaries::BinaryMirror;
use pool::{DownloadJob, DownloadOutcome, PoolConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default number of concurrent download workers
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Default per-job attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default per-attempt deadline
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Platform universe used when no platform filter is configured
pub const SUPPORTED_PLATFORMS: &[(&str, &str)] = &[
    ("linux", "amd64"),
    ("linux", "arm64"),
    ("linux", "386"),
    ("darwin", "amd64"),
    ("darwin", "arm64"),
    ("windows", "amd64"),
    ("windows", "386"),
    ("freebsd", "amd64"),
    ("freebsd", "386"),
];

/// Downloader configuration
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Root of the mirror store
    pub download_path: PathBuf,
    /// Optional proxy for all upstream traffic
    pub proxy_url: Option<String>,
    /// Interval between acquisition cycles
    pub check_period: Duration,
    /// Worker pool size
    pub max_concurrent: usize,
    /// Per-job attempt budget
    pub max_attempts: u32,
    /// Per-attempt deadline
    pub download_timeout: Duration,
    /// Provider filter string (empty = all providers)
    pub provider_filter: String,
    /// Platform filter string (empty = all supported platforms)
    pub platform_filter: String,
    /// Binaries filter string (empty = no binaries pass)
    pub download_binaries: String,
    /// Upstream registry base URL
    pub registry_url: String,
    /// Releases site base URL for the binaries pass
    pub releases_url: String,
}

impl DownloaderConfig {
    pub fn new(download_path: impl Into<PathBuf>) -> Self {
        Self {
            download_path: download_path.into(),
            proxy_url: None,
            check_period: Duration::from_secs(24 * 3600),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            provider_filter: String::new(),
            platform_filter: String::new(),
            download_binaries: String::new(),
            registry_url: registry::DEFAULT_REGISTRY_URL.to_string(),
            releases_url: binaries::DEFAULT_RELEASES_URL.to_string(),
        }
    }
}

/// Counts reported for one completed acquisition cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    /// Archives fetched this cycle (including retry-pass successes)
    pub downloaded: usize,
    /// Jobs whose archive was already valid on disk
    pub skipped: usize,
    /// Jobs still failed after the retry pass
    pub failed: usize,
    /// Tuples excluded at planning time (filters or disk probe)
    pub pre_filtered: usize,
}

/// The downloader half of the mirror
pub struct DownloaderService {
    config: DownloaderConfig,
    client: HttpClient,
    registry: RegistryClient,
    metadata: Arc<MirrorMetadata>,
    provider_filter: ProviderFilter,
    platform_filter: PlatformFilter,
    running: AtomicBool,
}

impl DownloaderService {
    pub fn new(config: DownloaderConfig) -> Result<Self> {
        let client = HttpClient::new(HttpClientConfig {
            proxy_url: config.proxy_url.clone(),
            ..Default::default()
        })?;
        let registry = RegistryClient::new(client.clone(), config.registry_url.clone());

        let provider_filter = ProviderFilter::parse(&config.provider_filter)?;
        let platform_filter = PlatformFilter::parse(&config.platform_filter)?;

        let metadata = Arc::new(MirrorMetadata::load(&config.download_path));

        if provider_filter.is_enabled() {
            info!(
                "provider filter enabled: {provider_filter} ({} providers)",
                provider_filter.count()
            );
        } else {
            info!("provider filter disabled, mirroring all providers");
        }
        if platform_filter.is_enabled() {
            info!(
                "platform filter enabled: {platform_filter} ({} platforms)",
                platform_filter.count()
            );
        } else {
            info!("platform filter disabled, mirroring all supported platforms");
        }

        Ok(Self {
            config,
            client,
            registry,
            metadata,
            provider_filter,
            platform_filter,
            running: AtomicBool::new(false),
        })
    }

    /// Journal handle, shared with the store on disk
    pub fn metadata(&self) -> &MirrorMetadata {
        &self.metadata
    }

    /// Run the service: one immediate cycle, then one per check period,
    /// until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("starting provider downloader service");
        info!("download path: {}", self.config.download_path.display());
        info!("check period: {:?}", self.config.check_period);

        if let Err(e) = self.cycle_guarded(&cancel).await {
            if e.is_cancelled() {
                info!("shutdown requested, stopping downloader");
                return Err(e);
            }
            error!("initial download cycle failed: {e}");
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.check_period,
            self.config.check_period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested, stopping downloader");
                    return Err(Error::Cancelled);
                }
                _ = ticker.tick() => {
                    info!("starting scheduled provider update");
                    if let Err(e) = self.cycle_guarded(&cancel).await {
                        if e.is_cancelled() {
                            info!("shutdown requested, stopping downloader");
                            return Err(e);
                        }
                        error!("scheduled download cycle failed: {e}");
                    }
                }
            }
        }
    }

    /// Cycle entry point with the non-overlap guard. Two cycles must never
    /// run concurrently against one store; a tick observed mid-cycle is
    /// skipped.
    async fn cycle_guarded(&self, cancel: &CancellationToken) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("acquisition cycle already in progress, skipping this tick");
            return Ok(());
        }
        let result = self.run_cycle(cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    /// Run one full acquisition cycle
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let start = Instant::now();

        let providers = self.resolve_providers(cancel).await?;
        if providers.is_empty() {
            warn!("no providers to process");
            return Ok(CycleSummary::default());
        }

        let platforms = self.platforms_to_download();
        let (jobs, pre_filtered) = self.plan_jobs(&providers, &platforms, cancel).await?;
        info!(
            "queued {} download jobs, pre-filtered {pre_filtered} tuples",
            jobs.len()
        );

        let pool_config = PoolConfig {
            max_concurrent: self.config.max_concurrent,
            max_attempts: self.config.max_attempts,
            download_timeout: self.config.download_timeout,
        };

        let mut downloaded = 0usize;
        let mut skipped = 0usize;
        let mut failed_jobs: HashSet<DownloadJob> = HashSet::new();
        let mut timeout_jobs: Vec<DownloadJob> = Vec::new();
        let mut downloaded_files: HashSet<PathBuf> = HashSet::new();

        let results = pool::run_pool(
            self.registry.clone(),
            self.config.download_path.clone(),
            jobs,
            pool_config.clone(),
            cancel,
        )
        .await;

        for result in results {
            match result.outcome {
                DownloadOutcome::Ok => {
                    downloaded += 1;
                    self.record_job(&result.job, &mut downloaded_files, true);
                }
                DownloadOutcome::Skipped => {
                    skipped += 1;
                    self.record_job(&result.job, &mut downloaded_files, false);
                }
                DownloadOutcome::FailedTimeout(e) => {
                    error!("download failed for {}: {e}", result.job);
                    timeout_jobs.push(result.job.clone());
                    failed_jobs.insert(result.job);
                }
                DownloadOutcome::FailedOther(e) => {
                    error!("download failed for {}: {e}", result.job);
                    failed_jobs.insert(result.job);
                }
            }
        }

        // Second pass: every first-pass outcome has been received by now, so
        // retry outcomes cannot interleave with stragglers.
        if !timeout_jobs.is_empty() && !cancel.is_cancelled() {
            warn!("retrying {} jobs that failed due to timeout", timeout_jobs.len());
            let retry_results = pool::run_pool(
                self.registry.clone(),
                self.config.download_path.clone(),
                timeout_jobs.clone(),
                pool_config,
                cancel,
            )
            .await;

            for result in retry_results {
                match result.outcome {
                    DownloadOutcome::Ok => {
                        downloaded += 1;
                        self.record_job(&result.job, &mut downloaded_files, true);
                        failed_jobs.remove(&result.job);
                    }
                    DownloadOutcome::Skipped => {
                        skipped += 1;
                        self.record_job(&result.job, &mut downloaded_files, false);
                        failed_jobs.remove(&result.job);
                    }
                    DownloadOutcome::FailedTimeout(e) | DownloadOutcome::FailedOther(e) => {
                        error!("retry download failed for {}: {e}", result.job);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.metadata.touch_last_check();
        self.metadata.flush()?;

        // Index documents are written only after all outcomes are in, so a
        // reader never sees an index referencing an absent archive.
        for provider in &providers {
            let dir = registry::provider_dir(
                &self.config.download_path,
                &provider.namespace,
                &provider.name,
            );
            if !dir.is_dir() {
                continue;
            }
            match indexgen::generate_provider_index(&dir) {
                Ok(()) => info!("generated index.json for {}/{}", provider.namespace, provider.name),
                Err(e) => error!(
                    "failed to generate index.json for {}/{}: {e}",
                    provider.namespace, provider.name
                ),
            }
        }

        let total_bytes: u64 = downloaded_files
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        let summary = CycleSummary {
            downloaded,
            skipped,
            failed: failed_jobs.len(),
            pre_filtered,
        };
        info!(
            "download session completed: {} downloaded, {} skipped, {} failed, {} pre-filtered, {:.1?} elapsed, {:.2} MB",
            summary.downloaded,
            summary.skipped,
            summary.failed,
            summary.pre_filtered,
            start.elapsed(),
            total_bytes as f64 / (1024.0 * 1024.0),
        );

        self.run_binaries_pass(cancel).await?;

        Ok(summary)
    }

    /// Rebuild the journal from the archives actually on disk
    pub fn rescan(&self) -> Result<()> {
        self.metadata.rescan()
    }

    /// Resolve the provider list for this cycle: probe each filtered
    /// provider, or discover everything when the filter is disabled.
    async fn resolve_providers(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProviderListItem>> {
        if self.provider_filter.is_enabled() {
            let mut providers = Vec::new();
            for item in self.provider_filter.items() {
                info!("checking provider {}/{}", item.namespace, item.name);
                match self
                    .registry
                    .provider_versions(&item.namespace, &item.name, cancel)
                    .await
                {
                    Ok(_) => providers.push(ProviderListItem {
                        namespace: item.namespace.clone(),
                        name: item.name.clone(),
                        description: None,
                    }),
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        error!(
                            "provider {}/{} not found or inaccessible: {e}",
                            item.namespace, item.name
                        );
                    }
                }
            }
            info!("provider filter applied: {} providers found", providers.len());
            Ok(providers)
        } else {
            info!("no provider filter, discovering all providers from the registry");
            let providers = self.registry.discover_all_providers(cancel).await?;
            info!("registry discovery completed: {} providers found", providers.len());
            Ok(providers)
        }
    }

    fn platforms_to_download(&self) -> Vec<(String, String)> {
        let platforms: Vec<(String, String)> = SUPPORTED_PLATFORMS
            .iter()
            .filter(|&&(os, arch)| self.platform_filter.should_include(os, arch))
            .map(|&(os, arch)| (os.to_string(), arch.to_string()))
            .collect();
        if self.platform_filter.is_enabled() {
            info!("platform filter applied: {} platforms selected", platforms.len());
        } else {
            info!("processing all {} supported platforms", platforms.len());
        }
        platforms
    }

    /// Produce the ordered job list for this cycle, pre-skipping tuples that
    /// are filtered out or already materialized.
    async fn plan_jobs(
        &self,
        providers: &[ProviderListItem],
        platforms: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<(Vec<DownloadJob>, usize)> {
        let mut jobs = Vec::new();
        let mut pre_filtered = 0usize;

        for provider in providers {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!("processing provider {}/{}", provider.namespace, provider.name);
            let versions = match self
                .registry
                .provider_versions(&provider.namespace, &provider.name, cancel)
                .await
            {
                Ok(v) => v,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    error!(
                        "failed to get versions for {}/{}: {e}",
                        provider.namespace, provider.name
                    );
                    continue;
                }
            };

            let version_strings: Vec<String> =
                versions.versions.iter().map(|v| v.version.clone()).collect();
            debug!(
                "found {} versions for {}/{}",
                version_strings.len(),
                provider.namespace,
                provider.name
            );

            let min_version = self
                .provider_filter
                .min_version(&provider.namespace, &provider.name);
            let filtered = crate::filters::filter_versions_by_min(&version_strings, min_version);

            for version in &filtered {
                self.ensure_version_metadata(provider, version, cancel).await;

                for (os, arch) in platforms {
                    if self.should_download(&provider.namespace, &provider.name, version, os, arch) {
                        jobs.push(DownloadJob {
                            namespace: provider.namespace.clone(),
                            name: provider.name.clone(),
                            version: version.clone(),
                            os: os.clone(),
                            arch: arch.clone(),
                        });
                    } else {
                        pre_filtered += 1;
                    }
                }
            }
        }

        Ok((jobs, pre_filtered))
    }

    /// Cache the upstream per-version metadata document next to the
    /// archives. The mirror index is unusable without it, but a terminal
    /// fetch failure only logs: the next cycle tries again.
    async fn ensure_version_metadata(
        &self,
        provider: &ProviderListItem,
        version: &str,
        cancel: &CancellationToken,
    ) {
        let path = registry::version_json_path(
            &self.config.download_path,
            &provider.namespace,
            &provider.name,
            version,
        );
        if fsutil::file_exists(&path) {
            return;
        }

        let url = self
            .registry
            .version_metadata_url(&provider.namespace, &provider.name, version);
        debug!("fetching version metadata document {url}");
        if let Err(e) = self.registry.download_file(&url, &path, cancel).await {
            error!(
                "failed to fetch version metadata for {}/{} {version}: {e}",
                provider.namespace, provider.name
            );
        }
    }

    /// Planner predicate: filters first, then journal, then the disk probe.
    /// The probe is authoritative: a journal entry whose file is missing is
    /// re-enqueued.
    fn should_download(&self, namespace: &str, name: &str, version: &str, os: &str, arch: &str) -> bool {
        if self.provider_filter.is_enabled() && !self.provider_filter.should_include(namespace, name) {
            return false;
        }
        if self.platform_filter.is_enabled() && !self.platform_filter.should_include(os, arch) {
            return false;
        }

        if !self.metadata.provider_has_version(namespace, name, version) {
            debug!("{namespace}/{name} {version} {os}_{arch} not in journal, should download");
            return true;
        }

        let dir = registry::provider_dir(&self.config.download_path, namespace, name);
        if fsutil::archive_present(&dir, name, version, os, arch) {
            info!("archive already on disk for {namespace}/{name} {version} {os}_{arch}, skipping");
            return false;
        }

        debug!("{namespace}/{name} {version} {os}_{arch} in journal but missing on disk, should download");
        true
    }

    fn record_job(&self, job: &DownloadJob, downloaded_files: &mut HashSet<PathBuf>, fetched: bool) {
        self.metadata
            .record_provider(&job.namespace, &job.name, &job.version, &job.os, &job.arch);
        if fetched {
            downloaded_files.insert(registry::provider_path(
                &self.config.download_path,
                &job.namespace,
                &job.name,
                &registry::provider_filename(&job.name, &job.version, &job.os, &job.arch),
            ));
        }
    }

    /// Mirror tool binaries from the releases site, when configured
    async fn run_binaries_pass(&self, cancel: &CancellationToken) -> Result<()> {
        if self.config.download_binaries.is_empty() {
            return Ok(());
        }

        info!("starting download of tool binaries from the releases site");
        let filters = match parse_binary_filter(&self.config.download_binaries) {
            Ok(f) => f,
            Err(e) => {
                error!("failed to parse binaries filter: {e}");
                return Ok(());
            }
        };

        let platforms = self.platforms_to_download();
        let mirror = BinaryMirror::new(
            self.client.clone(),
            self.config.releases_url.clone(),
            self.config.download_path.clone(),
        );

        match mirror.download_all(&filters, &platforms, cancel).await {
            Ok(summaries) => {
                for summary in &summaries {
                    self.metadata.record_binary(
                        &summary.tool,
                        &summary.versions,
                        &summary.platforms,
                        summary.downloaded,
                    );
                }
                info!("tool binaries download completed");
                self.metadata.flush()?;
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                error!("failed to download tool binaries: {e}");
                Ok(())
            }
        }
    }
}
