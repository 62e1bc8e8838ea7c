//! Capability traits for the remote store.
//!
//! The engine and orchestrator depend only on these traits. Concrete
//! stores (S3, the in-memory remote) implement them; tests use mocks.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use stowage_transfer::ProgressCallback;

use crate::error::SyncError;
use crate::types::{HeadResult, UploadMetadata};

/// Boxed future returned by the capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Suffix of in-flight download files.
pub const PARTIAL_SUFFIX: &str = "stowage-partial";

/// Supplies existence, size and fingerprints for remote keys.
pub trait RemoteMetadataGateway: Send + Sync {
    /// Looks up `key`. A missing object is `Ok(HeadResult::NotFound)`;
    /// any other failure is an error and is not retried by the caller.
    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<HeadResult, SyncError>>;
}

/// Moves bytes between the local tree and the remote store.
pub trait TransferExecutor: Send + Sync {
    /// Uploads `local_path` to `key`, storing `metadata` alongside it.
    /// Returns the number of bytes sent.
    fn upload<'a>(
        &'a self,
        local_path: &'a Path,
        key: &'a str,
        metadata: &'a UploadMetadata,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<u64, SyncError>>;

    /// Downloads `key` to `local_path`. Returns the number of bytes received.
    ///
    /// Implementations write to [`partial_path`] first and rename into
    /// place only once every byte has arrived.
    fn download<'a>(
        &'a self,
        key: &'a str,
        local_path: &'a Path,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<u64, SyncError>>;
}

/// Temporary path a download is written to before it is complete.
pub fn partial_path(local_path: &Path) -> PathBuf {
    let mut name = local_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    local_path.with_file_name(name)
}
