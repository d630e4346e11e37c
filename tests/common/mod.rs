// tests/common/mod.rs

//! Shared test fixtures: an in-process mock of the upstream registry and of
//! the releases site, both bound to ephemeral loopback ports.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// One provider known to the mock registry
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub namespace: String,
    pub name: String,
    pub versions: Vec<String>,
}

/// State behind the mock registry
#[derive(Default)]
pub struct MockRegistry {
    pub providers: Vec<MockProvider>,
    /// filename -> archive bytes
    pub archives: HashMap<String, Vec<u8>>,
    /// filenames whose advertised shasum is deliberately wrong
    pub bad_shasums: Vec<String>,
    /// archive requests served so far
    pub archive_hits: AtomicUsize,
    /// provider list pages served so far
    pub list_hits: AtomicUsize,
    /// when set, the first archive request stalls this long before replying
    pub first_archive_delay: Option<Duration>,
    /// set by [`spawn_registry`] once the listener is bound
    pub base_url: OnceLock<String>,
}

impl MockRegistry {
    pub fn base_url(&self) -> &str {
        self.base_url.get().expect("mock registry not started")
    }

    fn provider(&self, namespace: &str, name: &str) -> Option<&MockProvider> {
        self.providers
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
    }
}

/// Canonical archive filename used by the fixtures
pub fn archive_name(name: &str, version: &str, os: &str, arch: &str) -> String {
    format!("terraform-provider-{name}_{version}_{os}_{arch}.zip")
}

/// Build a small but valid zip archive for fixture providers
pub fn zip_bytes(entry_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file(entry_name, options).unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Start the mock registry; returns its base URL and shared state
pub async fn spawn_registry(state: MockRegistry) -> (String, Arc<MockRegistry>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    state.base_url.set(format!("http://{addr}")).unwrap();
    let state = Arc::new(state);

    let app = Router::new()
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/{namespace}/{name}/versions", get(provider_versions))
        .route(
            "/v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}",
            get(provider_package),
        )
        .route("/v1/providers/{namespace}/{name}/{doc}", get(version_document))
        .route("/files/{filename}", get(serve_archive))
        .with_state(Arc::clone(&state));

    let base_url = state.base_url().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (base_url, state)
}

async fn list_providers(
    State(state): State<Arc<MockRegistry>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    state.list_hits.fetch_add(1, Ordering::SeqCst);
    let offset: usize = params
        .get("offset")
        .and_then(|o| o.parse().ok())
        .unwrap_or(0);
    let limit: usize = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(100);

    let providers: Vec<_> = state
        .providers
        .iter()
        .skip(offset)
        .take(limit)
        .map(|p| json!({"namespace": p.namespace, "name": p.name}))
        .collect();
    Json(json!({ "providers": providers }))
}

async fn provider_versions(
    State(state): State<Arc<MockRegistry>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    match state.provider(&namespace, &name) {
        Some(provider) => {
            let versions: Vec<_> = provider
                .versions
                .iter()
                .map(|v| json!({"version": v, "platforms": []}))
                .collect();
            Json(json!({ "versions": versions })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn provider_package(
    State(state): State<Arc<MockRegistry>>,
    Path((namespace, name, version, os, arch)): Path<(String, String, String, String, String)>,
) -> Response {
    let filename = archive_name(&name, &version, &os, &arch);
    let Some(bytes) = state.archives.get(&filename) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if state.provider(&namespace, &name).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let shasum = if state.bad_shasums.contains(&filename) {
        "0".repeat(64)
    } else {
        sha256_hex(bytes)
    };

    Json(json!({
        "protocols": ["5.0"],
        "os": os,
        "arch": arch,
        "filename": filename,
        "download_url": format!("{}/files/{filename}", state.base_url()),
        "shasums_url": "",
        "shasums_signature_url": "",
        "shasum": shasum,
    }))
    .into_response()
}

async fn version_document(
    State(state): State<Arc<MockRegistry>>,
    Path((namespace, name, doc)): Path<(String, String, String)>,
) -> Response {
    if state.provider(&namespace, &name).is_none() || !doc.ends_with(".json") {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({"archives": {}})).into_response()
}

async fn serve_archive(
    State(state): State<Arc<MockRegistry>>,
    Path(filename): Path<String>,
) -> Response {
    let hits = state.archive_hits.fetch_add(1, Ordering::SeqCst);
    if hits == 0 {
        if let Some(delay) = state.first_archive_delay {
            tokio::time::sleep(delay).await;
        }
    }
    match state.archives.get(&filename) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// State behind the mock releases site
#[derive(Default)]
pub struct MockReleases {
    /// tool -> published versions
    pub tools: HashMap<String, Vec<String>>,
    /// zip filename -> bytes; anything listed but absent here serves 404
    pub archives: HashMap<String, Vec<u8>>,
}

/// Start the mock releases site; returns its base URL
pub async fn spawn_releases(state: MockReleases) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(state);

    let app = Router::new()
        .route("/{tool}/", get(tool_index))
        .route("/{tool}/{version}/{zip}", get(tool_archive))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn tool_index(
    State(state): State<Arc<MockReleases>>,
    Path(tool): Path<String>,
) -> Response {
    let Some(versions) = state.tools.get(&tool) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let links: String = versions
        .iter()
        .map(|v| format!("<a href=\"/{tool}/{v}/\">{tool}_{v}</a>\n"))
        .collect();
    axum::response::Html(format!("<html><body>{links}</body></html>")).into_response()
}

async fn tool_archive(
    State(state): State<Arc<MockReleases>>,
    Path((_tool, _version, zip)): Path<(String, String, String)>,
) -> Response {
    match state.archives.get(&zip) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
