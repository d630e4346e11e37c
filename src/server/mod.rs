// src/server/mod.rs

//! HTTP(S) server publishing the mirror store.
//!
//! The store is served as static files so the Network Mirror index and
//! archive URLs resolve directly to what the downloader materialized, plus
//! `/health`, `/version` and `/metrics` endpoints. A middleware layer feeds
//! the metrics collector for every request.

pub mod metrics;

use crate::error::{Error, Result};
use crate::version::BuildInfo;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use metrics::{Metrics, SystemInfo};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Deadline for draining in-flight requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on; empty means all interfaces
    pub listen_host: String,
    pub listen_port: u16,
    /// DNS hostname of the mirror, informational only
    pub hostname: Option<String>,
    pub enable_tls: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Root of the mirror store to publish
    pub data_path: PathBuf,
}

/// Shared state for all request handlers
pub struct ServerState {
    pub data_path: PathBuf,
    pub metrics: Metrics,
    pub system_info: SystemInfo,
}

/// Build the router over the given state
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/metrics", get(handle_metrics))
        .fallback_service(ServeDir::new(&state.data_path))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_requests,
        ))
        .with_state(state)
}

/// Run the server until the token is cancelled
pub async fn run_server(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    if !config.data_path.is_dir() {
        return Err(Error::ConfigInvalid(format!(
            "data path does not exist: {}",
            config.data_path.display()
        )));
    }
    if config.listen_port == 0 {
        return Err(Error::ConfigInvalid("listen port must be non-zero".into()));
    }

    let host = if config.listen_host.is_empty() {
        "0.0.0.0"
    } else {
        &config.listen_host
    };
    let addr: SocketAddr = format!("{host}:{}", config.listen_port)
        .parse()
        .map_err(|e| Error::ConfigInvalid(format!("invalid listen address: {e}")))?;

    let state = Arc::new(ServerState {
        data_path: config.data_path.clone(),
        metrics: Metrics::new(),
        system_info: SystemInfo::current(),
    });
    let app = create_router(Arc::clone(&state));

    if let Some(hostname) = &config.hostname {
        info!("mirror hostname: {hostname}");
    }

    if config.enable_tls {
        let (cert, key) = match (&config.tls_cert, &config.tls_key) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => {
                return Err(Error::ConfigInvalid(
                    "tls-crt and tls-key are required when TLS is enabled".into(),
                ))
            }
        };
        for path in [&cert, &key] {
            if !path.is_file() {
                return Err(Error::ConfigInvalid(format!(
                    "TLS file does not exist: {}",
                    path.display()
                )));
            }
        }

        info!("starting HTTPS server on {addr}");
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
            .await
            .map_err(|e| Error::ConfigInvalid(format!("failed to load TLS certificate: {e}")))?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            info!("shutting down server");
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(|e| Error::Other(format!("server failed: {e}")))?;
    } else {
        info!("starting HTTP server on {addr}");
        let listener = tokio::net::TcpListener::bind(addr).await?;

        let drain_cancel = cancel.clone();
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            drain_cancel.cancelled().await;
            info!("shutting down server");
        });

        // Drain in-flight requests, but never for longer than the grace
        // period; connections still open after the deadline are dropped.
        tokio::select! {
            result = serve => {
                result.map_err(|e| Error::Other(format!("server failed: {e}")))?;
            }
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!(
                    "shutdown deadline of {}s exceeded, aborting open connections",
                    SHUTDOWN_GRACE.as_secs()
                );
            }
        }
    }

    info!("server stopped");
    Ok(())
}

/// Middleware: per-endpoint counters, rolling response time, and serve
/// counts keyed on the first two path segments.
async fn track_requests(
    State(state): State<Arc<ServerState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    let is_error = response.status().as_u16() >= 400;
    state.metrics.record_request(&path, start.elapsed(), is_error);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    if segments.len() >= 2 && !segments[0].is_empty() {
        state
            .metrics
            .record_provider_served(&format!("{}/{}", segments[0], segments[1]));
    }

    response
}

/// `GET /health`: 200 while the data directory is accessible, 503 otherwise
async fn handle_health(State(state): State<Arc<ServerState>>) -> Response {
    let mut health = json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": crate::version::version_string(),
    });

    if !state.data_path.is_dir() {
        health["status"] = json!("unhealthy");
        health["error"] = json!("data directory not accessible");
        return (StatusCode::SERVICE_UNAVAILABLE, Json(health)).into_response();
    }

    Json(health).into_response()
}

/// `GET /version`: build metadata
async fn handle_version() -> Json<BuildInfo> {
    Json(BuildInfo::current())
}

/// `GET /metrics`: Prometheus text exposition
async fn handle_metrics(State(state): State<Arc<ServerState>>) -> Response {
    // Disk usage walks the whole store; refresh it off the request path and
    // serve the previous value, like the uptime-style gauges.
    let walk_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || {
        walk_state.metrics.update_disk_usage(&walk_state.data_path);
    });

    let body = state.metrics.render_prometheus(&state.system_info);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
