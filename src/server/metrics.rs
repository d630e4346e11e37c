// src/server/metrics.rs

//! Request metrics and Prometheus text exposition.
//!
//! One collector per server. The middleware records every request; the
//! `/metrics` handler renders the current state in Prometheus text format.
//! The average response time is a rolling window over the last hundred
//! requests.

use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Rolling window size for the average response time
const RESPONSE_WINDOW: usize = 100;

/// Per-endpoint request statistics
#[derive(Debug, Clone, Default)]
pub struct EndpointStat {
    pub request_count: u64,
    pub error_count: u64,
    pub average_response: Duration,
    pub last_access_unix: i64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    request_count: u64,
    error_count: u64,
    response_times: VecDeque<Duration>,
    average_response: Duration,
    last_request_unix: i64,
    providers_served: BTreeMap<String, u64>,
    endpoints: BTreeMap<String, EndpointStat>,
    disk_usage_bytes: u64,
}

/// Server metrics collector
#[derive(Debug)]
pub struct Metrics {
    start_time: Instant,
    inner: RwLock<MetricsInner>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            inner: RwLock::new(MetricsInner::default()),
        }
    }

    /// Record one request with its endpoint, duration and error status
    pub fn record_request(&self, endpoint: &str, duration: Duration, is_error: bool) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");

        inner.request_count += 1;
        inner.last_request_unix = Utc::now().timestamp();

        if inner.response_times.len() >= RESPONSE_WINDOW {
            inner.response_times.pop_front();
        }
        inner.response_times.push_back(duration);
        let total: Duration = inner.response_times.iter().sum();
        inner.average_response = total / inner.response_times.len() as u32;

        if is_error {
            inner.error_count += 1;
        }

        let now_unix = inner.last_request_unix;
        let stat = inner.endpoints.entry(endpoint.to_string()).or_default();
        stat.request_count += 1;
        stat.last_access_unix = now_unix;
        if is_error {
            stat.error_count += 1;
        }
        // Cumulative moving average keeps per-endpoint state to one value.
        stat.average_response = (stat.average_response * (stat.request_count - 1) as u32
            + duration)
            / stat.request_count as u32;
    }

    /// Bump the serve counter for a provider (`namespace/name` key)
    pub fn record_provider_served(&self, provider: &str) {
        let mut inner = self.inner.write().expect("metrics lock poisoned");
        *inner.providers_served.entry(provider.to_string()).or_insert(0) += 1;
    }

    /// Recompute the store size. Walks the whole tree, so callers run this
    /// off the request path.
    pub fn update_disk_usage(&self, data_path: &Path) {
        let usage: u64 = WalkDir::new(data_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum();

        let mut inner = self.inner.write().expect("metrics lock poisoned");
        inner.disk_usage_bytes = usage;
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn render_prometheus(&self, system_info: &SystemInfo) -> String {
        let inner = self.inner.read().expect("metrics lock poisoned");
        let mut out = String::with_capacity(2048);

        out.push_str("# HELP tfmirror_uptime_seconds Uptime of the server in seconds\n");
        out.push_str("# TYPE tfmirror_uptime_seconds gauge\n");
        out.push_str(&format!(
            "tfmirror_uptime_seconds {:.6}\n",
            self.start_time.elapsed().as_secs_f64()
        ));

        out.push_str("# HELP tfmirror_requests_total Total number of HTTP requests\n");
        out.push_str("# TYPE tfmirror_requests_total counter\n");
        out.push_str(&format!("tfmirror_requests_total {}\n", inner.request_count));

        out.push_str("# HELP tfmirror_errors_total Total number of HTTP errors\n");
        out.push_str("# TYPE tfmirror_errors_total counter\n");
        out.push_str(&format!("tfmirror_errors_total {}\n", inner.error_count));

        out.push_str(
            "# HELP tfmirror_average_response_seconds Average response time (last 100 requests)\n",
        );
        out.push_str("# TYPE tfmirror_average_response_seconds gauge\n");
        out.push_str(&format!(
            "tfmirror_average_response_seconds {:.6}\n",
            inner.average_response.as_secs_f64()
        ));

        out.push_str("# HELP tfmirror_last_request_unixtime Last request time as unix timestamp\n");
        out.push_str("# TYPE tfmirror_last_request_unixtime gauge\n");
        out.push_str(&format!(
            "tfmirror_last_request_unixtime {:.6}\n",
            inner.last_request_unix as f64
        ));

        out.push_str(
            "# HELP tfmirror_providers_served_total Number of times each provider was served\n",
        );
        out.push_str("# TYPE tfmirror_providers_served_total counter\n");
        for (provider, count) in &inner.providers_served {
            out.push_str(&format!(
                "tfmirror_providers_served_total{{provider=\"{}\"}} {count}\n",
                escape_label(provider)
            ));
        }

        out.push_str("# HELP tfmirror_disk_usage_bytes Disk usage of mirror data path in bytes\n");
        out.push_str("# TYPE tfmirror_disk_usage_bytes gauge\n");
        out.push_str(&format!("tfmirror_disk_usage_bytes {}\n", inner.disk_usage_bytes));

        out.push_str("# HELP tfmirror_system_info System info as labels\n");
        out.push_str("# TYPE tfmirror_system_info gauge\n");
        out.push_str(&format!(
            "tfmirror_system_info{{rust_version=\"{}\",platform=\"{}\",num_cpu=\"{}\"}} 1\n",
            escape_label(&system_info.rust_version),
            escape_label(&system_info.platform),
            system_info.num_cpu,
        ));

        out.push_str("# HELP tfmirror_endpoint_requests_total Total requests per endpoint\n");
        out.push_str("# TYPE tfmirror_endpoint_requests_total counter\n");
        out.push_str("# HELP tfmirror_endpoint_errors_total Total errors per endpoint\n");
        out.push_str("# TYPE tfmirror_endpoint_errors_total counter\n");
        out.push_str(
            "# HELP tfmirror_endpoint_average_response_seconds Average response time per endpoint\n",
        );
        out.push_str("# TYPE tfmirror_endpoint_average_response_seconds gauge\n");
        out.push_str(
            "# HELP tfmirror_endpoint_last_access_unixtime Last access time per endpoint (unix timestamp)\n",
        );
        out.push_str("# TYPE tfmirror_endpoint_last_access_unixtime gauge\n");
        for (endpoint, stat) in &inner.endpoints {
            let ep = escape_label(endpoint);
            out.push_str(&format!(
                "tfmirror_endpoint_requests_total{{endpoint=\"{ep}\"}} {}\n",
                stat.request_count
            ));
            out.push_str(&format!(
                "tfmirror_endpoint_errors_total{{endpoint=\"{ep}\"}} {}\n",
                stat.error_count
            ));
            out.push_str(&format!(
                "tfmirror_endpoint_average_response_seconds{{endpoint=\"{ep}\"}} {:.6}\n",
                stat.average_response.as_secs_f64()
            ));
            out.push_str(&format!(
                "tfmirror_endpoint_last_access_unixtime{{endpoint=\"{ep}\"}} {:.6}\n",
                stat.last_access_unix as f64
            ));
        }

        out
    }
}

/// Static host facts exposed as labels on `tfmirror_system_info`
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub rust_version: String,
    pub platform: String,
    pub num_cpu: usize,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            rust_version: env!("TF_MIRROR_RUSTC").to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            num_cpu: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Escape a Prometheus label value: backslashes and double quotes
fn escape_label(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
