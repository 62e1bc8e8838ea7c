//! Sync orchestrator: bounded concurrent push and pull runs.
//!
//! Each file is reconciled and, when needed, transferred independently.
//! Per-file failures land in that file's [`FileResult`]; only
//! authentication and configuration failures abort the run.

use std::path::PathBuf;
use std::sync::Arc;

use stowage_transfer::{Digest, ProgressCallback, TransferProgress};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gateway::{RemoteMetadataGateway, TransferExecutor, partial_path};
use crate::path_map::PathMapper;
use crate::reconcile::ReconciliationEngine;
use crate::types::{
    Direction, FileOutcome, FileRef, FileResult, Reconciliation, RunSummary, SyncEvent,
    TransferReason, UploadMetadata,
};

/// Event channel capacity. Events are dropped, never awaited, when full.
const EVENT_CAPACITY: usize = 256;

/// Runs push and pull over a set of files with a bounded worker count.
pub struct SyncOrchestrator {
    config: Arc<SyncConfig>,
    mapper: Arc<PathMapper>,
    gateway: Arc<dyn RemoteMetadataGateway>,
    executor: Arc<dyn TransferExecutor>,
    events_tx: mpsc::Sender<SyncEvent>,
    events_rx: Option<mpsc::Receiver<SyncEvent>>,
    cancel: CancellationToken,
}

enum Job {
    Push(FileRef),
    Pull(String),
}

impl SyncOrchestrator {
    /// Creates an orchestrator. Fails on invalid configuration.
    pub fn new(
        config: SyncConfig,
        gateway: Arc<dyn RemoteMetadataGateway>,
        executor: Arc<dyn TransferExecutor>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let mapper = PathMapper::new(&config.source, &config.target)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            mapper: Arc::new(mapper),
            gateway,
            executor,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.events_rx.take()
    }

    /// Returns a token that cancels every in-flight and future file.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// Pushes local files to the remote store.
    ///
    /// Results are returned in input order.
    pub async fn push(&self, files: Vec<FileRef>) -> Result<Vec<FileResult>, SyncError> {
        self.run(Direction::Push, files.into_iter().map(Job::Push).collect())
            .await
    }

    /// Pulls remote keys into the local tree.
    ///
    /// Results are returned in input order.
    pub async fn pull(&self, keys: Vec<String>) -> Result<Vec<FileResult>, SyncError> {
        self.run(Direction::Pull, keys.into_iter().map(Job::Pull).collect())
            .await
    }

    async fn run(
        &self,
        direction: Direction,
        jobs: Vec<Job>,
    ) -> Result<Vec<FileResult>, SyncError> {
        let run_cancel = self.cancel.child_token();
        if let Some(deadline) = self.config.deadline() {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => {
                        warn!(?deadline, "deadline reached, cancelling run");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        let worker = Arc::new(FileWorker {
            config: Arc::clone(&self.config),
            mapper: Arc::clone(&self.mapper),
            engine: ReconciliationEngine::new(Arc::clone(&self.gateway), &self.config)
                .with_cancel(run_cancel.clone()),
            executor: Arc::clone(&self.executor),
            events_tx: self.events_tx.clone(),
            cancel: run_cancel.clone(),
        });

        let total = jobs.len();
        let _ = self.events_tx.try_send(SyncEvent::Started {
            direction,
            files: total,
        });
        let permits = Arc::new(Semaphore::new(self.config.workers));
        let mut tasks = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let worker = Arc::clone(&worker);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => worker.process(job).await,
                    Err(_) => Ok(worker.cancelled_result(job)),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<FileResult>> = vec![None; total];
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(result))) => slots[index] = Some(result),
                Ok((_, Err(e))) => {
                    error!(%direction, error = %e, "aborting run");
                    run_cancel.cancel();
                    permits.close();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    error!(%direction, error = %e, "worker task failed");
                }
            }
        }
        // Stops the deadline timer.
        run_cancel.cancel();

        if let Some(e) = fatal {
            return Err(e);
        }

        let results: Vec<FileResult> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| FileResult {
                    relative_path: String::new(),
                    remote_key: String::new(),
                    outcome: FileOutcome::Failed("worker task panicked".into()),
                })
            })
            .collect();

        let summary = RunSummary::from_results(&results);
        info!(
            %direction,
            files = total,
            transferred = summary.transferred,
            skipped = summary.skipped,
            unverifiable = summary.unverifiable,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "sync finished"
        );
        let _ = self.events_tx.try_send(SyncEvent::Finished(summary));
        Ok(results)
    }
}

/// Read-only state shared by every file task of a run.
struct FileWorker {
    config: Arc<SyncConfig>,
    mapper: Arc<PathMapper>,
    engine: ReconciliationEngine,
    executor: Arc<dyn TransferExecutor>,
    events_tx: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl FileWorker {
    /// Processes one job. `Err` only for errors that abort the run.
    async fn process(&self, job: Job) -> Result<FileResult, SyncError> {
        let (relative_path, remote_key, attempt) = match job {
            Job::Push(file) => {
                let relative = file.relative_path.clone();
                match self.mapper.key_for_relative(&relative) {
                    Ok(key) => {
                        let attempt = self.push_one(&file, &key).await;
                        (relative, key, attempt)
                    }
                    Err(e) => (relative, String::new(), Err(e)),
                }
            }
            Job::Pull(key) => match self.mapper.relative_from_key(&key) {
                Ok(relative) => {
                    let attempt = self.pull_one(&key).await;
                    (relative, key, attempt)
                }
                Err(e) => (String::new(), key, Err(e)),
            },
        };

        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(SyncError::Cancelled) => FileOutcome::Cancelled,
            Err(e) => {
                warn!(key = %remote_key, error = %e, "file failed");
                FileOutcome::Failed(e.to_string())
            }
        };

        let result = FileResult {
            relative_path,
            remote_key,
            outcome,
        };
        self.emit(SyncEvent::Completed(result.clone()));
        Ok(result)
    }

    fn cancelled_result(&self, job: Job) -> FileResult {
        let (relative_path, remote_key) = match job {
            Job::Push(file) => {
                let key = self
                    .mapper
                    .key_for_relative(&file.relative_path)
                    .unwrap_or_default();
                (file.relative_path, key)
            }
            Job::Pull(key) => (
                self.mapper.relative_from_key(&key).unwrap_or_default(),
                key,
            ),
        };
        FileResult {
            relative_path,
            remote_key,
            outcome: FileOutcome::Cancelled,
        }
    }

    async fn push_one(&self, file: &FileRef, key: &str) -> Result<FileOutcome, SyncError> {
        self.check_cancelled()?;
        let evaluation = self.engine.evaluate(file, key).await?;
        self.decided(key, &evaluation.reconciliation);
        let digest = evaluation.local_digest;

        match evaluation.reconciliation {
            Reconciliation::Skip(reason) => Ok(FileOutcome::Skipped(reason)),
            Reconciliation::Transfer(_) => self.upload(file, key, digest, false).await,
            Reconciliation::Unverifiable(reason) if self.config.force => {
                warn!(key, %reason, "unverifiable, forcing upload");
                self.upload(file, key, digest, true).await
            }
            Reconciliation::Unverifiable(reason) => {
                warn!(key, %reason, "unverifiable, not uploading without force");
                Ok(FileOutcome::Unverifiable(reason))
            }
        }
    }

    async fn pull_one(&self, key: &str) -> Result<FileOutcome, SyncError> {
        self.check_cancelled()?;
        let local_path = self.mapper.to_local_path(key)?;

        let decision = match tokio::fs::metadata(&local_path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Reconciliation::Transfer(TransferReason::LocalMissing)
            }
            Err(e) => return Err(e.into()),
            Ok(metadata) if !metadata.is_file() => {
                return Err(SyncError::PathMapping(format!(
                    "{} exists and is not a regular file",
                    local_path.display()
                )));
            }
            Ok(metadata) => {
                let file = FileRef {
                    relative_path: self.mapper.relative_path(&local_path)?,
                    size: metadata.len(),
                    path: local_path.clone(),
                };
                self.engine.reconcile(&file, key).await?
            }
        };
        self.decided(key, &decision);

        match decision {
            Reconciliation::Skip(reason) => Ok(FileOutcome::Skipped(reason)),
            Reconciliation::Transfer(TransferReason::RemoteMissing) => Ok(FileOutcome::Failed(
                format!("remote object {key} not found"),
            )),
            Reconciliation::Transfer(_) => self.download(key, local_path, false).await,
            Reconciliation::Unverifiable(reason) if self.config.force => {
                warn!(key, %reason, "unverifiable, forcing download");
                self.download(key, local_path, true).await
            }
            Reconciliation::Unverifiable(reason) => {
                warn!(key, %reason, "unverifiable, not downloading without force");
                Ok(FileOutcome::Unverifiable(reason))
            }
        }
    }

    async fn upload(
        &self,
        file: &FileRef,
        key: &str,
        digest: Option<Digest>,
        forced: bool,
    ) -> Result<FileOutcome, SyncError> {
        // Reuse the digest computed during reconciliation when there is one.
        let digest = match digest {
            Some(digest) => digest,
            None => self.engine.whole_digest(file).await?,
        };
        let metadata = UploadMetadata {
            algorithm: digest.algorithm(),
            stored_hash: digest.hex().to_string(),
        };
        debug!(key, hash = %digest, "uploading");

        let bytes = tokio::select! {
            result = self.executor.upload(&file.path, key, &metadata, Some(self.progress_callback())) => result?,
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
        };
        Ok(FileOutcome::Transferred { bytes, forced })
    }

    async fn download(
        &self,
        key: &str,
        local_path: PathBuf,
        forced: bool,
    ) -> Result<FileOutcome, SyncError> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(key, path = %local_path.display(), "downloading");

        let result = tokio::select! {
            result = self.executor.download(key, &local_path, Some(self.progress_callback())) => result,
            _ = self.cancel.cancelled() => Err(SyncError::Cancelled),
        };
        match result {
            Ok(bytes) => Ok(FileOutcome::Transferred { bytes, forced }),
            Err(e) => {
                // Never leave an interrupted download behind.
                let _ = tokio::fs::remove_file(partial_path(&local_path)).await;
                Err(e)
            }
        }
    }

    fn progress_callback(&self) -> ProgressCallback {
        let tx = self.events_tx.clone();
        Arc::new(move |progress: TransferProgress| {
            let _ = tx.try_send(SyncEvent::Progress(progress));
        })
    }

    fn decided(&self, key: &str, decision: &Reconciliation) {
        debug!(key, decision = %decision, "reconciled");
        self.emit(SyncEvent::Decided {
            key: key.to_string(),
            reconciliation: decision.clone(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events_tx.try_send(event);
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
