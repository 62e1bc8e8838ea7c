//! Runs a single push or pull against S3.

use std::sync::Arc;

use stowage_s3::S3Remote;
use stowage_sync::{
    Direction, FileOutcome, FileResult, RunSummary, SyncEvent, SyncOrchestrator, scan_tree,
};
use tokio::sync::mpsc;

use crate::config::Config;

/// Runs `direction` to completion or until Ctrl-C.
pub async fn run(config: Config, direction: Direction) -> anyhow::Result<RunSummary> {
    let remote = Arc::new(
        S3Remote::connect(&config.s3)
            .await?
            .with_part_size(config.sync.part_size)
            .with_algorithm(config.sync.hash_algorithm),
    );

    let mut orchestrator =
        SyncOrchestrator::new(config.sync.clone(), remote.clone(), remote.clone())?;
    if let Some(events) = orchestrator.take_events() {
        tokio::spawn(log_events(events));
    }

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT received, cancelling");
            cancel.cancel();
        }
    });

    let results = match direction {
        Direction::Push => {
            let files = scan_tree(&config.sync.source)?;
            tracing::info!(files = files.len(), "scanned source tree");
            orchestrator.push(files).await?
        }
        Direction::Pull => {
            let prefix = orchestrator.mapper().remote_prefix();
            let prefix = if prefix.is_empty() {
                prefix
            } else {
                format!("{prefix}/")
            };
            let keys = remote.list_keys(&prefix).await?;
            tracing::info!(keys = keys.len(), prefix = %prefix, "listed remote keys");
            orchestrator.pull(keys).await?
        }
    };

    report(&results);
    Ok(RunSummary::from_results(&results))
}

async fn log_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Decided {
                key,
                reconciliation,
            } => {
                tracing::debug!(key = %key, decision = %reconciliation, "decided");
            }
            SyncEvent::Progress(progress) => {
                tracing::trace!(
                    key = %progress.key,
                    transferred = progress.transferred,
                    total = progress.total,
                    "progress"
                );
            }
            SyncEvent::Started { .. } | SyncEvent::Completed(_) | SyncEvent::Finished(_) => {}
        }
    }
}

fn report(results: &[FileResult]) {
    for result in results {
        match &result.outcome {
            FileOutcome::Transferred { bytes, forced } => {
                tracing::info!(key = %result.remote_key, bytes, forced, "transferred");
            }
            FileOutcome::Unverifiable(reason) => {
                tracing::warn!(key = %result.remote_key, %reason, "unverifiable, left untouched");
            }
            FileOutcome::Failed(error) => {
                tracing::error!(
                    key = %result.remote_key,
                    path = %result.relative_path,
                    %error,
                    "failed"
                );
            }
            FileOutcome::Skipped(_) | FileOutcome::Cancelled => {}
        }
    }
}
