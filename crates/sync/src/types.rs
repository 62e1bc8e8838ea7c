//! Data types shared by the reconciliation engine and the orchestrator.

use std::fmt;
use std::path::{Path, PathBuf};

use stowage_transfer::{HashAlgorithm, TransferProgress};

use crate::error::SyncError;
use crate::path_map::relative_path;

/// A local file selected for synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Absolute local path.
    pub path: PathBuf,
    /// Size in bytes when the file was enumerated.
    pub size: u64,
    /// Path relative to the local root, `/`-separated.
    pub relative_path: String,
}

impl FileRef {
    /// Resolves `path` under `root`, reading its size from disk.
    pub fn resolve(root: &Path, path: &Path) -> Result<Self, SyncError> {
        let relative_path = relative_path(root, path)?;
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(SyncError::PathMapping(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            relative_path,
        })
    }
}

/// Remote metadata for one key, fetched fresh per reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteObjectMetadata {
    pub key: String,
    pub size: u64,
    /// Whole-object hash stored as a custom attribute at upload time.
    pub stored_hash: Option<String>,
    /// Store-computed fingerprint, `"<hex>-<parts>"` for multipart objects.
    pub composite_fingerprint: Option<String>,
}

/// Outcome of a metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadResult {
    Found(RemoteObjectMetadata),
    NotFound,
}

/// Metadata attached to an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex whole-object hash.
    pub stored_hash: String,
}

impl UploadMetadata {
    /// Custom attribute name the hash is stored under (`md5` by default).
    pub fn attribute_name(&self) -> &'static str {
        self.algorithm.name()
    }
}

/// Why a file did not need a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ContentHashMatch,
    FingerprintMatch,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ContentHashMatch => "content-hash match",
            Self::FingerprintMatch => "multipart fingerprint match",
        })
    }
}

/// Why a file needs a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferReason {
    RemoteMissing,
    LocalMissing,
    SizeMismatch,
    ContentHashMismatch,
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RemoteMissing => "remote object missing",
            Self::LocalMissing => "local file missing",
            Self::SizeMismatch => "size mismatch",
            Self::ContentHashMismatch => "content-hash mismatch",
        })
    }
}

/// Why local and remote content could not be proven equal or different.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnverifiableReason {
    FingerprintMismatch,
    NoRemoteFingerprint,
    MalformedFingerprint(String),
}

impl fmt::Display for UnverifiableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FingerprintMismatch => f.write_str("fingerprint mismatch"),
            Self::NoRemoteFingerprint => f.write_str("no remote fingerprint"),
            Self::MalformedFingerprint(raw) => write!(f, "malformed fingerprint {raw:?}"),
        }
    }
}

/// Per-file reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Skip(SkipReason),
    Transfer(TransferReason),
    /// Needs an explicit force to transfer; never resolved automatically.
    Unverifiable(UnverifiableReason),
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(r) => write!(f, "skip ({r})"),
            Self::Transfer(r) => write!(f, "transfer ({r})"),
            Self::Unverifiable(r) => write!(f, "unverifiable ({r})"),
        }
    }
}

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local tree to remote store.
    Push,
    /// Remote store to local tree.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
        })
    }
}

/// Final state of one file in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped(SkipReason),
    Transferred {
        bytes: u64,
        /// Transferred despite an unverifiable comparison.
        forced: bool,
    },
    Unverifiable(UnverifiableReason),
    Failed(String),
    Cancelled,
}

/// Result entry for one file of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResult {
    pub relative_path: String,
    pub remote_key: String,
    pub outcome: FileOutcome,
}

/// Event emitted while a run is in progress.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A run began over `files` files or keys.
    Started { direction: Direction, files: usize },
    /// The engine decided what to do with a key.
    Decided {
        key: String,
        reconciliation: Reconciliation,
    },
    /// Byte progress of an ongoing transfer.
    Progress(TransferProgress),
    /// A file reached its final state.
    Completed(FileResult),
    /// The run ended without aborting.
    Finished(RunSummary),
}

/// Counts of each outcome in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub skipped: usize,
    pub transferred: usize,
    pub unverifiable: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn from_results(results: &[FileResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.outcome {
                FileOutcome::Skipped(_) => summary.skipped += 1,
                FileOutcome::Transferred { .. } => summary.transferred += 1,
                FileOutcome::Unverifiable(_) => summary.unverifiable += 1,
                FileOutcome::Failed(_) => summary.failed += 1,
                FileOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}
