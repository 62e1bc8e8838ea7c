//! Per-file reconciliation: skip, transfer or unverifiable.
//!
//! Decision order for a mapped key:
//!
//! 1. Remote missing → transfer (no hashing).
//! 2. Stored whole-object hash present → compare with the local
//!    whole-object digest (a size mismatch short-circuits to transfer).
//! 3. Otherwise only the store's composite fingerprint is available:
//!    back-solve the part size from its part count, re-fingerprint the
//!    local file and compare. A mismatch is unverifiable, never an
//!    automatic transfer.

use std::path::PathBuf;
use std::sync::Arc;

use stowage_transfer::{
    ChunkReader, Digest, HashAlgorithm, MultipartFingerprint, multipart_fingerprint,
    part_count_for, recover_part_size, whole_object_digest,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gateway::RemoteMetadataGateway;
use crate::types::{
    FileRef, HeadResult, Reconciliation, RemoteObjectMetadata, SkipReason, TransferReason,
    UnverifiableReason,
};

/// Algorithm object stores use for ETags. Independent of the configured
/// stored-hash algorithm.
const ETAG_ALGORITHM: HashAlgorithm = HashAlgorithm::Md5;

/// A decision plus the local whole-object digest (configured algorithm),
/// when the comparison had to compute it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub reconciliation: Reconciliation,
    pub local_digest: Option<Digest>,
}

impl Evaluation {
    fn decided(reconciliation: Reconciliation) -> Self {
        Self {
            reconciliation,
            local_digest: None,
        }
    }
}

/// Decides, per file, whether a transfer is necessary.
#[derive(Clone)]
pub struct ReconciliationEngine {
    gateway: Arc<dyn RemoteMetadataGateway>,
    algorithm: HashAlgorithm,
    part_size: u64,
    part_size_unit: u64,
    cancel: CancellationToken,
}

impl ReconciliationEngine {
    /// Creates an engine using the hashing settings from `config`.
    pub fn new(gateway: Arc<dyn RemoteMetadataGateway>, config: &SyncConfig) -> Self {
        Self {
            gateway,
            algorithm: config.hash_algorithm,
            part_size: config.part_size,
            part_size_unit: config.part_size_unit,
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts lookups and hashing once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Looks up `key` and compares it with `file`.
    pub async fn reconcile(&self, file: &FileRef, key: &str) -> Result<Reconciliation, SyncError> {
        Ok(self.evaluate(file, key).await?.reconciliation)
    }

    /// Like [`reconcile`](Self::reconcile), also returning the local
    /// whole-object digest when the comparison computed one.
    pub async fn evaluate(&self, file: &FileRef, key: &str) -> Result<Evaluation, SyncError> {
        let head = tokio::select! {
            result = self.gateway.head(key) => result?,
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
        };

        match head {
            HeadResult::NotFound => {
                debug!(key, "remote object missing");
                Ok(Evaluation::decided(Reconciliation::Transfer(
                    TransferReason::RemoteMissing,
                )))
            }
            HeadResult::Found(remote) => self.assess(file, &remote).await,
        }
    }

    /// Compares `file` against already fetched remote metadata.
    pub async fn compare(
        &self,
        file: &FileRef,
        remote: &RemoteObjectMetadata,
    ) -> Result<Reconciliation, SyncError> {
        Ok(self.assess(file, remote).await?.reconciliation)
    }

    /// Whole-object digest of `file` with the configured algorithm.
    pub async fn whole_digest(&self, file: &FileRef) -> Result<Digest, SyncError> {
        self.whole_digest_with(file, self.algorithm).await
    }

    /// Multipart fingerprint of `file` at `part_size`, as an object store
    /// computes its ETag.
    pub async fn multipart_digest(
        &self,
        file: &FileRef,
        part_size: u64,
    ) -> Result<Digest, SyncError> {
        let path: PathBuf = file.path.clone();
        let cancel = self.cancel.clone();
        let digest = tokio::task::spawn_blocking(move || {
            let reader = ChunkReader::new(&path, part_size)?.with_cancel(cancel);
            multipart_fingerprint(reader, ETAG_ALGORITHM)
        })
        .await??;
        Ok(digest)
    }

    async fn assess(
        &self,
        file: &FileRef,
        remote: &RemoteObjectMetadata,
    ) -> Result<Evaluation, SyncError> {
        if let Some(stored) = remote.stored_hash.as_deref() {
            return self.compare_stored_hash(file, remote, stored).await;
        }

        let Some(raw) = remote.composite_fingerprint.as_deref() else {
            return Ok(Evaluation::decided(Reconciliation::Unverifiable(
                UnverifiableReason::NoRemoteFingerprint,
            )));
        };

        match MultipartFingerprint::parse(raw) {
            Ok(fingerprint) => Ok(Evaluation::decided(
                self.compare_fingerprint(file, &fingerprint).await?,
            )),
            Err(_) if is_plain_etag(raw) => self.compare_single_part(file, raw).await,
            Err(_) => Ok(Evaluation::decided(Reconciliation::Unverifiable(
                UnverifiableReason::MalformedFingerprint(raw.to_string()),
            ))),
        }
    }

    /// Whole-object digest on the blocking pool.
    async fn whole_digest_with(
        &self,
        file: &FileRef,
        algorithm: HashAlgorithm,
    ) -> Result<Digest, SyncError> {
        let path = file.path.clone();
        let (part_size, cancel) = (self.part_size, self.cancel.clone());
        let digest = tokio::task::spawn_blocking(move || {
            let reader = ChunkReader::new(&path, part_size)?.with_cancel(cancel);
            whole_object_digest(reader, algorithm)
        })
        .await??;
        Ok(digest)
    }

    async fn compare_stored_hash(
        &self,
        file: &FileRef,
        remote: &RemoteObjectMetadata,
        stored: &str,
    ) -> Result<Evaluation, SyncError> {
        if remote.size != file.size {
            debug!(
                key = %remote.key,
                local = file.size,
                remote = remote.size,
                "size mismatch"
            );
            return Ok(Evaluation::decided(Reconciliation::Transfer(
                TransferReason::SizeMismatch,
            )));
        }

        let local = self.whole_digest(file).await?;
        debug!(key = %remote.key, local = %local, remote = stored, "comparing stored hash");
        let reconciliation = if local.matches_hex(stored) {
            Reconciliation::Skip(SkipReason::ContentHashMatch)
        } else {
            Reconciliation::Transfer(TransferReason::ContentHashMismatch)
        };
        Ok(Evaluation {
            reconciliation,
            local_digest: Some(local),
        })
    }

    async fn compare_fingerprint(
        &self,
        file: &FileRef,
        remote: &MultipartFingerprint,
    ) -> Result<Reconciliation, SyncError> {
        let parts = remote.part_count();

        // The configured size is tried first when it yields the advertised
        // part count; the back-solved size is tried next.
        let mut candidates = Vec::with_capacity(2);
        if part_count_for(file.size, self.part_size) == parts {
            candidates.push(self.part_size);
        }
        let recovered = recover_part_size(file.size, parts, self.part_size_unit)?;
        if !candidates.contains(&recovered) {
            candidates.push(recovered);
        }

        for part_size in candidates {
            let local = self.multipart_digest(file, part_size).await?;
            debug!(
                path = %file.relative_path,
                part_size,
                local = %local.fingerprint(),
                remote = %remote,
                "comparing multipart fingerprint"
            );
            if remote.matches(&local) {
                return Ok(Reconciliation::Skip(SkipReason::FingerprintMatch));
            }
        }

        Ok(Reconciliation::Unverifiable(
            UnverifiableReason::FingerprintMismatch,
        ))
    }

    /// A suffix-less fingerprint is a single-part upload's plain ETag.
    async fn compare_single_part(
        &self,
        file: &FileRef,
        raw: &str,
    ) -> Result<Evaluation, SyncError> {
        let local = self.whole_digest_with(file, ETAG_ALGORITHM).await?;
        let reconciliation = if local.matches_hex(raw) {
            Reconciliation::Skip(SkipReason::ContentHashMatch)
        } else {
            Reconciliation::Unverifiable(UnverifiableReason::FingerprintMismatch)
        };
        let local_digest = (local.algorithm() == self.algorithm).then_some(local);
        Ok(Evaluation {
            reconciliation,
            local_digest,
        })
    }
}

fn is_plain_etag(raw: &str) -> bool {
    let value = raw.trim().trim_matches('"');
    value.len() == ETAG_ALGORITHM.hex_len() && value.bytes().all(|b| b.is_ascii_hexdigit())
}
