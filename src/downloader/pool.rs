// src/downloader/pool.rs

//! Bounded worker pool for archive downloads.
//!
//! The planner hands a job list to [`run_pool`]; a fixed number of workers
//! drain it and every job yields exactly one outcome. A job attempt runs
//! under its own deadline; deadline failures are retried in-worker up to the
//! attempt budget and, if still failing, classified `FailedTimeout` so the
//! orchestrator can schedule a second pass.

use crate::error::Error;
use crate::fsutil;
use crate::registry::{self, RegistryClient};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long the orchestrator waits for any single outcome before logging
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// One unit of download work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadJob {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl fmt::Display for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} {}_{}",
            self.namespace, self.name, self.version, self.os, self.arch
        )
    }
}

/// Terminal classification of one job
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Archive fetched, verified and renamed into place
    Ok,
    /// A valid archive was already present
    Skipped,
    /// Every attempt ended in a deadline or client timeout
    FailedTimeout(Error),
    /// Failed for a non-timeout reason; not retried
    FailedOther(Error),
}

/// Outcome paired with its originating job
#[derive(Debug)]
pub struct JobResult {
    pub job: DownloadJob,
    pub outcome: DownloadOutcome,
}

/// Pool sizing and per-job limits
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub download_timeout: Duration,
}

struct PoolContext {
    registry: RegistryClient,
    download_path: PathBuf,
    config: PoolConfig,
    cancel: CancellationToken,
}

/// Run `jobs` through a pool of `max_concurrent` workers and collect exactly
/// one outcome per job.
///
/// A watchdog logs a warning whenever no outcome arrives for thirty
/// seconds, but collection only terminates once every job has reported.
pub async fn run_pool(
    registry: RegistryClient,
    download_path: PathBuf,
    jobs: Vec<DownloadJob>,
    config: PoolConfig,
    cancel: &CancellationToken,
) -> Vec<JobResult> {
    let total = jobs.len();
    if total == 0 {
        return Vec::new();
    }

    let (job_tx, job_rx) = mpsc::channel::<DownloadJob>(total);
    let (result_tx, mut result_rx) = mpsc::channel::<JobResult>(total);
    let job_rx = Arc::new(Mutex::new(job_rx));

    let ctx = Arc::new(PoolContext {
        registry,
        download_path,
        config: config.clone(),
        cancel: cancel.clone(),
    });

    let worker_count = config.max_concurrent.max(1).min(total);
    debug!("starting {worker_count} download workers for {total} jobs");
    for worker_id in 0..worker_count {
        let ctx = Arc::clone(&ctx);
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        tokio::spawn(worker_loop(worker_id, ctx, job_rx, result_tx));
    }
    drop(result_tx);

    for job in jobs {
        // Channel capacity equals the job count, so this never blocks.
        if job_tx.send(job).await.is_err() {
            break;
        }
    }
    drop(job_tx);

    let mut results = Vec::with_capacity(total);
    while results.len() < total {
        tokio::select! {
            received = result_rx.recv() => match received {
                Some(result) => results.push(result),
                None => {
                    error!(
                        "result channel closed after {}/{total} outcomes",
                        results.len()
                    );
                    break;
                }
            },
            _ = tokio::time::sleep(WATCHDOG_INTERVAL) => {
                warn!(
                    "still waiting for download outcome {}/{total}",
                    results.len() + 1
                );
            }
        }
    }

    results
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<PoolContext>,
    job_rx: Arc<Mutex<mpsc::Receiver<DownloadJob>>>,
    result_tx: mpsc::Sender<JobResult>,
) {
    debug!("[worker-{worker_id}] started");

    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let outcome = run_job(worker_id, &ctx, &job).await;
        if result_tx.send(JobResult { job, outcome }).await.is_err() {
            break;
        }
    }

    debug!("[worker-{worker_id}] finished");
}

/// Execute one job: attempt loop with a fresh deadline per attempt.
/// Timeouts restart the attempt; any other failure is terminal.
async fn run_job(worker_id: usize, ctx: &PoolContext, job: &DownloadJob) -> DownloadOutcome {
    let mut last_timeout: Option<Error> = None;

    for attempt in 1..=ctx.config.max_attempts.max(1) {
        if ctx.cancel.is_cancelled() {
            return DownloadOutcome::FailedOther(Error::Cancelled);
        }

        debug!("[worker-{worker_id}] attempt {attempt} for {job}");
        let attempt_result = tokio::time::timeout(
            ctx.config.download_timeout,
            fetch_one(ctx, job),
        )
        .await;

        match attempt_result {
            Ok(Ok(skipped)) => {
                return if skipped {
                    DownloadOutcome::Skipped
                } else {
                    DownloadOutcome::Ok
                };
            }
            Ok(Err(e)) if e.is_cancelled() => return DownloadOutcome::FailedOther(e),
            Ok(Err(e)) if e.is_timeout() => {
                warn!("[worker-{worker_id}] timeout downloading {job}, attempt {attempt}: {e}");
                last_timeout = Some(e);
            }
            Ok(Err(e)) => return DownloadOutcome::FailedOther(e),
            Err(_) => {
                warn!(
                    "[worker-{worker_id}] attempt {attempt} for {job} exceeded {}s deadline",
                    ctx.config.download_timeout.as_secs()
                );
                last_timeout = Some(Error::Timeout(format!(
                    "download of {job} exceeded attempt deadline"
                )));
            }
        }
    }

    DownloadOutcome::FailedTimeout(
        last_timeout.unwrap_or_else(|| Error::Timeout(format!("download of {job} timed out"))),
    )
}

/// Fetch metadata, then download, verify and materialize one archive.
/// Returns `Ok(true)` when a valid archive was already present.
async fn fetch_one(ctx: &PoolContext, job: &DownloadJob) -> crate::Result<bool> {
    let pkg = ctx
        .registry
        .provider_package(
            &job.namespace,
            &job.name,
            &job.version,
            &job.os,
            &job.arch,
            &ctx.cancel,
        )
        .await?;

    let dest = registry::provider_path(&ctx.download_path, &job.namespace, &job.name, &pkg.filename);

    if fsutil::file_exists(&dest) {
        match fsutil::verify_checksum(&dest, &pkg.shasum) {
            Ok(()) => {
                info!("archive already present for {job}, skipping download");
                return Ok(true);
            }
            Err(e) => {
                info!("existing archive for {job} failed verification ({e}), re-downloading");
            }
        }
    }

    info!("downloading {job}");
    debug!("download URL: {}", pkg.download_url);
    ctx.registry
        .download_file(&pkg.download_url, &dest, &ctx.cancel)
        .await?;

    if let Err(e) = fsutil::verify_checksum(&dest, &pkg.shasum) {
        error!("verification failed for freshly downloaded {job}: {e}");
        let _ = std::fs::remove_file(&dest);
        return Err(e);
    }

    info!("downloaded {job}");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_display_matches_log_format() {
        let job = DownloadJob {
            namespace: "acme".into(),
            name: "thing".into(),
            version: "1.0.0".into(),
            os: "linux".into(),
            arch: "amd64".into(),
        };
        assert_eq!(job.to_string(), "acme/thing 1.0.0 linux_amd64");
    }
}
