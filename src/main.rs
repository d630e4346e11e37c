// src/main.rs

//! tf-mirror CLI entry point.
//!
//! One binary, two modes: `downloader` acquires provider archives and tool
//! binaries into the store; `server` publishes the store. Every flag has an
//! environment-variable mirror; a flag on the command line wins over its
//! environment value.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tf_mirror::downloader::{DownloaderConfig, DownloaderService};
use tf_mirror::server::{self, ServerConfig};
use tf_mirror::version;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Download provider packages from the upstream registry
    Downloader,
    /// Serve downloaded packages as a registry mirror
    Server,
}

#[derive(Parser, Debug)]
#[command(
    name = "tf-mirror",
    version = version::version_string(),
    about = "Terraform registry mirror: downloader and network-mirror server"
)]
struct Cli {
    /// Application mode
    #[arg(long, env = "TF_MIRROR_MODE", value_enum)]
    mode: Mode,

    /// Enable debug logging
    #[arg(long, env = "DEBUG")]
    debug: bool,

    // === Downloader options ===
    /// Directory for downloaded packages (required in downloader mode)
    #[arg(long, env = "DOWNLOAD_PATH")]
    download_path: Option<PathBuf>,

    /// HTTP/HTTPS/SOCKS5 proxy URL for upstream traffic
    #[arg(long, env = "PROXY")]
    proxy: Option<String>,

    /// Period between acquisition cycles, in hours
    #[arg(long, env = "CHECK_PERIOD", default_value_t = 24)]
    check_period: u64,

    /// Comma-separated providers to mirror, e.g. 'hashicorp/aws,acme/thing>1.1.0'
    #[arg(long, env = "PROVIDER_FILTER", default_value = "")]
    provider_filter: String,

    /// Comma-separated platforms to mirror, e.g. 'linux_amd64,darwin_arm64'
    #[arg(long, env = "PLATFORM_FILTER", default_value = "")]
    platform_filter: String,

    /// Maximum download attempts per job
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// Download timeout per attempt, in seconds
    #[arg(long, env = "DOWNLOAD_TIMEOUT", default_value_t = 180)]
    download_timeout: u64,

    /// Comma-separated tool binaries to mirror, e.g. 'consul>1.15.0'
    #[arg(long, env = "DOWNLOAD_BINARIES", default_value = "")]
    download_binaries: String,

    // === Server options ===
    /// Path to the directory containing downloaded packages (required in
    /// server mode)
    #[arg(long, env = "DATA_PATH")]
    data_path: Option<PathBuf>,

    /// Address to listen on (default: all interfaces)
    #[arg(long, env = "LISTEN_HOST", default_value = "")]
    listen_host: String,

    /// Port to listen on
    #[arg(long, env = "LISTEN_PORT", default_value_t = 80)]
    listen_port: u16,

    /// DNS hostname of the mirror (informational)
    #[arg(long, env = "HOSTNAME")]
    hostname: Option<String>,

    /// Enable HTTPS
    #[arg(long, env = "ENABLE_TLS")]
    enable_tls: bool,

    /// Path to the TLS certificate (required with --enable-tls)
    #[arg(long = "tls-crt", env = "TLS_CRT")]
    tls_crt: Option<PathBuf>,

    /// Path to the TLS private key (required with --enable-tls)
    #[arg(long, env = "TLS_KEY")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!("starting Terraform registry mirror");
    info!("version: {}", version::version_string());

    // SIGINT/SIGTERM cancel the root token; both roles drain and exit.
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match cli.mode {
        Mode::Downloader => run_downloader(cli, cancel).await,
        Mode::Server => run_server(cli, cancel).await,
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received interrupt signal"),
                _ = sigterm.recv() => info!("received termination signal"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received interrupt signal");
        }
        cancel.cancel();
    });
}

async fn run_downloader(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let Some(download_path) = cli.download_path else {
        bail!("--download-path is required for downloader mode");
    };
    if cli.check_period == 0 {
        bail!("--check-period must be positive");
    }

    std::fs::create_dir_all(&download_path)
        .with_context(|| format!("failed to create download directory {}", download_path.display()))?;

    info!("downloader configuration:");
    info!("  download path: {}", download_path.display());
    info!("  check period: {} hours", cli.check_period);
    info!("  proxy: {}", cli.proxy.as_deref().unwrap_or("none"));
    info!(
        "  provider filter: {}",
        if cli.provider_filter.is_empty() { "all providers" } else { &cli.provider_filter }
    );
    info!(
        "  platform filter: {}",
        if cli.platform_filter.is_empty() { "all supported platforms" } else { &cli.platform_filter }
    );

    let config = DownloaderConfig {
        proxy_url: cli.proxy,
        check_period: Duration::from_secs(cli.check_period * 3600),
        max_attempts: cli.max_attempts,
        download_timeout: Duration::from_secs(cli.download_timeout),
        provider_filter: cli.provider_filter,
        platform_filter: cli.platform_filter,
        download_binaries: cli.download_binaries,
        ..DownloaderConfig::new(download_path)
    };

    let service = DownloaderService::new(config).context("failed to create downloader service")?;

    match service.run(cancel).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_cancelled() => {
            info!("downloader stopped");
            Ok(())
        }
        Err(e) => Err(e).context("downloader service failed"),
    }
}

async fn run_server(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let Some(data_path) = cli.data_path else {
        bail!("--data-path is required for server mode");
    };

    info!("server configuration:");
    info!("  listen address: {}:{}", cli.listen_host, cli.listen_port);
    info!("  data path: {}", data_path.display());
    info!("  TLS enabled: {}", cli.enable_tls);

    let config = ServerConfig {
        listen_host: cli.listen_host,
        listen_port: cli.listen_port,
        hostname: cli.hostname,
        enable_tls: cli.enable_tls,
        tls_cert: cli.tls_crt,
        tls_key: cli.tls_key,
        data_path,
    };

    server::run_server(config, cancel)
        .await
        .context("server failed")
}
