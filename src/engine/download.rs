//! Concurrent, checksum-verified downloads.
//!
//! [`DownloadManager`] owns a fixed pool of workers that pull jobs from a
//! shared queue, so the number of transfers in flight never exceeds the
//! configured concurrency, however many applications are being checked. Each
//! [`fetch`](DownloadManager::fetch) call enqueues its requests and waits for
//! one reply per request.
//!
//! # Transfer rules
//!
//! - Bytes stream into a hidden `.<asset>.<random>.part` file inside the
//!   destination directory, so the later rename into place stays on one
//!   filesystem. Nothing is ever written under a final name here.
//! - The digest is computed while streaming.
//! - Each attempt has its own timeout. Timeouts, connection failures and 5xx
//!   responses are retried with exponential backoff, restarting the transfer
//!   from scratch. 4xx responses are not retried.
//! - Checksum verification runs after the transfer. A mismatch is never
//!   retried.
//! - Cancelling the request's token aborts the transfer, including backoff
//!   sleeps.
//!
//! Any failure drops the temporary file, which deletes it. Successful results
//! hand the temporary path to the caller, who must rename or delete it.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::verification::{ChecksumVerifier, StreamingDigest, enforce_policy};
use crate::config::{ChecksumPolicy, EngineConfig};
use crate::constants::{DOWNLOAD_QUEUE_CAPACITY, PART_SUFFIX};
use crate::core::RelkeepError;
use crate::models::{Asset, DownloadResult, DownloadStatus, Warning};
use crate::utils::backoff::{default_backoff_base, retry_delays};

/// Receives advisory progress events during downloads.
///
/// Implementations must be cheap; they are called for every chunk.
pub trait ProgressSink: Send + Sync {
    /// A transfer attempt started. Called again when an attempt is retried.
    fn started(&self, asset: &str, total: Option<u64>);
    /// `done` bytes of the current attempt have been written.
    fn advanced(&self, asset: &str, done: u64, total: Option<u64>);
    /// The download ended.
    fn finished(&self, asset: &str, success: bool);
}

/// A [`ProgressSink`] that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn started(&self, _asset: &str, _total: Option<u64>) {}
    fn advanced(&self, _asset: &str, _done: u64, _total: Option<u64>) {}
    fn finished(&self, _asset: &str, _success: bool) {}
}

/// Download manager tuning.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Worker count: the maximum number of transfers in flight
    pub concurrency: usize,
    /// Timeout of a single attempt
    pub timeout: Duration,
    /// Retries after a transient failure
    pub retries: u32,
    /// First backoff delay; doubles per retry
    pub backoff_base: Duration,
}

impl DownloadSettings {
    /// Settings from the `[engine]` configuration table.
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.max_concurrent_downloads.max(1),
            timeout: config.download_timeout(),
            retries: config.retries,
            backoff_base: default_backoff_base(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

/// One asset to download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// The asset to fetch
    pub asset: Asset,
    /// Other assets of the same release, searched for digest files
    pub siblings: Vec<Asset>,
    /// Directory the temporary file is created in
    pub dest_dir: PathBuf,
    /// Checksum policy to enforce
    pub checksum: ChecksumPolicy,
    /// Cancels this download when triggered
    pub cancel: CancellationToken,
}

struct Job {
    request: DownloadRequest,
    reply: oneshot::Sender<DownloadResult>,
}

struct WorkerContext {
    client: reqwest::Client,
    verifier: ChecksumVerifier,
    settings: DownloadSettings,
    progress: Arc<dyn ProgressSink>,
}

/// Bounded worker pool for asset downloads.
///
/// Must be created inside a Tokio runtime: the workers are spawned
/// immediately and stop once the manager is dropped and the queue drains.
pub struct DownloadManager {
    sender: mpsc::Sender<Job>,
    settings: DownloadSettings,
}

impl DownloadManager {
    /// Start `settings.concurrency` workers sharing one job queue.
    pub fn new(
        client: reqwest::Client,
        settings: DownloadSettings,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(DOWNLOAD_QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(WorkerContext {
            verifier: ChecksumVerifier::new(client.clone()),
            client,
            settings: settings.clone(),
            progress,
        });

        let workers = settings.concurrency.max(1);
        for worker_id in 0..workers {
            tokio::spawn(worker_loop(worker_id, Arc::clone(&receiver), Arc::clone(&context)));
        }
        debug!("Started {} download workers", workers);

        Self {
            sender,
            settings,
        }
    }

    /// The settings the workers were started with.
    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Download every request; results come back in request order.
    ///
    /// Individual failures are reported in the matching [`DownloadResult`],
    /// never as an error of the whole batch.
    pub async fn fetch(&self, requests: Vec<DownloadRequest>) -> Vec<DownloadResult> {
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let asset_name = request.asset.name.clone();
            let (reply, response) = oneshot::channel();
            let queued = self
                .sender
                .send(Job {
                    request,
                    reply,
                })
                .await
                .is_ok();
            pending.push((asset_name, queued.then_some(response)));
        }

        join_all(pending.into_iter().map(|(asset_name, response)| async move {
            let stopped = || anyhow::anyhow!("download workers stopped before '{asset_name}' finished");
            match response {
                Some(response) => match response.await {
                    Ok(result) => result,
                    Err(_) => DownloadResult::failed(&asset_name, stopped(), Duration::ZERO),
                },
                None => DownloadResult::failed(&asset_name, stopped(), Duration::ZERO),
            }
        }))
        .await
    }

    /// Download a single asset.
    pub async fn fetch_one(&self, request: DownloadRequest) -> DownloadResult {
        let asset_name = request.asset.name.clone();
        self.fetch(vec![request]).await.pop().unwrap_or_else(|| {
            DownloadResult::failed(&asset_name, anyhow::anyhow!("no download result"), Duration::ZERO)
        })
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<Mutex<mpsc::Receiver<Job>>>, context: Arc<WorkerContext>) {
    loop {
        let job = {
            let mut receiver = queue.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            debug!("Download worker {} stopping", worker_id);
            break;
        };

        debug!("Worker {} downloading {}", worker_id, job.request.asset.name);
        let result = context.download(job.request).await;
        // the requester may have gone away; the temp file is already cleaned up then
        let _ = job.reply.send(result);
    }
}

/// A completed transfer whose file is still temporary.
struct Transfer {
    path: TempPath,
    digest: String,
    bytes: u64,
}

impl WorkerContext {
    async fn download(&self, request: DownloadRequest) -> DownloadResult {
        let start = Instant::now();
        let asset_name = request.asset.name.clone();

        let work = async {
            let transfer = self.transfer_with_retries(&request).await?;
            let (status, warning) = self.verify(&request, &transfer).await?;
            Ok::<_, anyhow::Error>((transfer, status, warning))
        };

        let outcome = tokio::select! {
            biased;
            () = request.cancel.cancelled() => Err(RelkeepError::Cancelled {
                operation: format!("download of '{asset_name}'"),
            }
            .into()),
            outcome = work => outcome,
        };

        let result = match outcome {
            Ok((transfer, status, warning)) => match transfer.path.keep() {
                Ok(path) => {
                    info!(
                        "Downloaded {} ({} bytes in {:.1}s)",
                        asset_name,
                        transfer.bytes,
                        start.elapsed().as_secs_f64()
                    );
                    DownloadResult {
                        asset_name: asset_name.clone(),
                        path: Some(path),
                        digest: Some(transfer.digest),
                        bytes: transfer.bytes,
                        elapsed: start.elapsed(),
                        status,
                        warnings: warning.into_iter().collect(),
                        error: None,
                    }
                }
                Err(e) => DownloadResult::failed(
                    &asset_name,
                    anyhow::Error::from(e.error).context("Failed to keep downloaded file"),
                    start.elapsed(),
                ),
            },
            Err(e) => {
                warn!("Download of {} failed: {:#}", asset_name, e);
                DownloadResult::failed(&asset_name, e, start.elapsed())
            }
        };

        self.progress.finished(&asset_name, result.is_success());
        result
    }

    async fn transfer_with_retries(&self, request: &DownloadRequest) -> Result<Transfer> {
        let asset_name = &request.asset.name;
        let strategy = retry_delays(self.settings.backoff_base, self.settings.retries);

        RetryIf::start(
            strategy,
            || self.attempt(request),
            |e: &anyhow::Error| {
                let transient = is_transient(e);
                if transient {
                    warn!("Transient failure downloading {}: {:#}", asset_name, e);
                }
                transient
            },
        )
        .await
    }

    async fn attempt(&self, request: &DownloadRequest) -> Result<Transfer> {
        match tokio::time::timeout(self.settings.timeout, self.transfer(request)).await {
            Ok(result) => result,
            Err(_) => Err(RelkeepError::Timeout {
                asset: request.asset.name.clone(),
                timeout: self.settings.timeout,
            }
            .into()),
        }
    }

    async fn transfer(&self, request: &DownloadRequest) -> Result<Transfer> {
        let asset = &request.asset;
        debug!("GET {}", asset.url);

        let temp = create_part_file(&request.dest_dir, &asset.name).await?;

        let mut response = self
            .client
            .get(&asset.url)
            .send()
            .await
            .map_err(|e| request_error(&asset.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelkeepError::HttpStatus {
                asset: asset.name.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let total = response.content_length().or(asset.size);
        self.progress.started(&asset.name, total);

        let (file, path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut digest = StreamingDigest::new(request.checksum.algorithm);
        let mut bytes = 0u64;

        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(&asset.name, &e))? {
            file.write_all(&chunk).await.map_err(|e| RelkeepError::fs("write", &path, e))?;
            digest.update(&chunk);
            bytes += chunk.len() as u64;
            self.progress.advanced(&asset.name, bytes, total);
        }

        file.flush().await.map_err(|e| RelkeepError::fs("flush", &path, e))?;
        file.sync_all().await.map_err(|e| RelkeepError::fs("sync", &path, e))?;

        if let Some(expected) = total {
            if bytes != expected {
                return Err(RelkeepError::Network {
                    asset: asset.name.clone(),
                    reason: format!("body ended after {bytes} of {expected} bytes"),
                }
                .into());
            }
        }

        Ok(Transfer {
            path,
            digest: digest.finalize_hex(),
            bytes,
        })
    }

    async fn verify(
        &self,
        request: &DownloadRequest,
        transfer: &Transfer,
    ) -> Result<(DownloadStatus, Option<Warning>)> {
        let policy = &request.checksum;
        if !policy.enabled {
            return Ok((DownloadStatus::Succeeded, None));
        }

        let lookup = self.verifier.expected_digest(policy, &request.asset, &request.siblings).await;
        let verification = lookup.verify(&transfer.digest);
        match enforce_policy(policy, &request.asset.name, &verification)? {
            Some(warning) => Ok((DownloadStatus::Unverified, Some(warning))),
            None => Ok((DownloadStatus::Succeeded, None)),
        }
    }
}

impl DownloadResult {
    /// A failed result carrying `error`.
    pub fn failed(asset_name: &str, error: anyhow::Error, elapsed: Duration) -> Self {
        Self {
            asset_name: asset_name.to_string(),
            path: None,
            digest: None,
            bytes: 0,
            elapsed,
            status: DownloadStatus::Failed,
            warnings: Vec::new(),
            error: Some(error),
        }
    }
}

/// Whether a download error is worth another attempt.
pub fn is_transient(error: &anyhow::Error) -> bool {
    error.downcast_ref::<RelkeepError>().is_some_and(RelkeepError::is_transient)
}

async fn create_part_file(dest_dir: &std::path::Path, asset_name: &str) -> Result<tempfile::NamedTempFile> {
    let dir = dest_dir.to_path_buf();
    let prefix = format!(".{asset_name}.");
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir).map_err(|e| RelkeepError::fs("create directory", &dir, e))?;
        tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(PART_SUFFIX)
            .tempfile_in(&dir)
            .map_err(|e| RelkeepError::fs("create temporary file in", &dir, e).into())
    })
    .await
    .context("spawn_blocking panicked")?
}

fn request_error(asset_name: &str, error: &reqwest::Error) -> anyhow::Error {
    if error.is_builder() {
        return RelkeepError::Other {
            message: format!("Invalid download URL for '{asset_name}': {error}"),
        }
        .into();
    }
    RelkeepError::Network {
        asset: asset_name.to_string(),
        reason: error.to_string(),
    }
    .into()
}
