//! In-memory remote store.
//!
//! Behaves like an object store for reconciliation purposes: uploads keep
//! the stored-hash attribute they were given and get a store-computed MD5
//! fingerprint, plain hex for single-part objects and `"<hex>-<parts>"`
//! otherwise. Useful for dry runs and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use stowage_transfer::{
    HashAlgorithm, MultipartHasher, ProgressCallback, ProgressTracker, checksum_bytes,
};
use tracing::debug;

use crate::error::SyncError;
use crate::gateway::{BoxFuture, RemoteMetadataGateway, TransferExecutor, partial_path};
use crate::types::{HeadResult, RemoteObjectMetadata, UploadMetadata};

/// Failure injected for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Transport,
    Auth,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    stored_hash: Option<String>,
    fingerprint: String,
}

/// Object store kept in a `HashMap`.
pub struct MemoryRemote {
    objects: RwLock<HashMap<String, StoredObject>>,
    failures: RwLock<HashMap<String, InjectedFailure>>,
    part_size: u64,
    heads: AtomicUsize,
}

impl MemoryRemote {
    /// Creates an empty store that splits uploads into `part_size` parts.
    pub fn new(part_size: u64) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            part_size: part_size.max(1),
            heads: AtomicUsize::new(0),
        }
    }

    /// Stores an object as a foreign uploader would: no stored hash
    /// attribute, fingerprint computed at `part_size`.
    pub fn insert_foreign(&self, key: &str, data: Vec<u8>, part_size: u64) {
        let fingerprint = self.fingerprint(&data, part_size.max(1));
        self.write_objects().insert(
            key.to_string(),
            StoredObject {
                data,
                stored_hash: None,
                fingerprint,
            },
        );
    }

    /// Makes every operation on `key` fail with `failure`.
    pub fn fail_key(&self, key: &str, failure: InjectedFailure) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), failure);
    }

    /// Object content, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.read_objects().get(key).map(|o| o.data.clone())
    }

    /// Stored hash attribute of an object.
    pub fn stored_hash(&self, key: &str) -> Option<String> {
        self.read_objects()
            .get(key)
            .and_then(|o| o.stored_hash.clone())
    }

    /// Store-computed fingerprint of an object.
    pub fn fingerprint_of(&self, key: &str) -> Option<String> {
        self.read_objects().get(key).map(|o| o.fingerprint.clone())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_objects().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of metadata lookups served.
    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    /// S3-style ETag: always MD5, whatever algorithm the stored hash uses.
    fn fingerprint(&self, data: &[u8], part_size: u64) -> String {
        // part_size is at least 1, and fits in usize for any in-memory object.
        let step = usize::try_from(part_size).unwrap_or(usize::MAX);
        if data.len() <= step {
            return checksum_bytes(HashAlgorithm::Md5, data);
        }
        let mut hasher = MultipartHasher::new(HashAlgorithm::Md5);
        for part in data.chunks(step) {
            hasher.update_part(part);
        }
        hasher.finish(part_size).fingerprint()
    }

    fn check_failure(&self, key: &str) -> Result<(), SyncError> {
        let failures = self.failures.read().unwrap_or_else(|e| e.into_inner());
        match failures.get(key) {
            Some(InjectedFailure::Transport) => {
                Err(SyncError::Transport(format!("injected failure for {key}")))
            }
            Some(InjectedFailure::Auth) => {
                Err(SyncError::Auth(format!("access denied for {key}")))
            }
            None => Ok(()),
        }
    }

    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_objects(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl RemoteMetadataGateway for MemoryRemote {
    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<HeadResult, SyncError>> {
        Box::pin(async move {
            self.heads.fetch_add(1, Ordering::SeqCst);
            self.check_failure(key)?;
            let objects = self.read_objects();
            Ok(match objects.get(key) {
                Some(object) => HeadResult::Found(RemoteObjectMetadata {
                    key: key.to_string(),
                    size: object.data.len() as u64,
                    stored_hash: object.stored_hash.clone(),
                    composite_fingerprint: Some(object.fingerprint.clone()),
                }),
                None => HeadResult::NotFound,
            })
        })
    }
}

impl TransferExecutor for MemoryRemote {
    fn upload<'a>(
        &'a self,
        local_path: &'a Path,
        key: &'a str,
        metadata: &'a UploadMetadata,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<u64, SyncError>> {
        Box::pin(async move {
            self.check_failure(key)?;
            let data = tokio::fs::read(local_path).await?;
            let size = data.len() as u64;

            let tracker = ProgressTracker::new(key, size, progress, None);
            let step = usize::try_from(self.part_size).unwrap_or(usize::MAX);
            for part in data.chunks(step) {
                tracker.advance(part.len() as u64);
            }
            tracker.finish();

            let fingerprint = self.fingerprint(&data, self.part_size);
            debug!(key, size, fingerprint = %fingerprint, "stored object");
            self.write_objects().insert(
                key.to_string(),
                StoredObject {
                    data,
                    stored_hash: Some(metadata.stored_hash.clone()),
                    fingerprint,
                },
            );
            Ok(size)
        })
    }

    fn download<'a>(
        &'a self,
        key: &'a str,
        local_path: &'a Path,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<u64, SyncError>> {
        Box::pin(async move {
            self.check_failure(key)?;
            let data = self
                .get(key)
                .ok_or_else(|| SyncError::Transport(format!("no such key: {key}")))?;
            let size = data.len() as u64;

            let partial = partial_path(local_path);
            if let Err(e) = tokio::fs::write(&partial, &data).await {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.into());
            }
            tokio::fs::rename(&partial, local_path).await?;

            let tracker = ProgressTracker::new(key, size, progress, None);
            tracker.advance(size);
            tracker.finish();
            Ok(size)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use stowage_transfer::TransferProgress;
    use tempfile::TempDir;

    fn md5_meta(data: &[u8]) -> UploadMetadata {
        UploadMetadata {
            algorithm: HashAlgorithm::Md5,
            stored_hash: checksum_bytes(HashAlgorithm::Md5, data),
        }
    }

    #[tokio::test]
    async fn head_missing_key_is_not_found() {
        let remote = MemoryRemote::new(4);
        assert_eq!(remote.head("nope").await.unwrap(), HeadResult::NotFound);
        assert_eq!(remote.head_count(), 1);
    }

    #[tokio::test]
    async fn upload_stores_hash_and_multipart_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        let data = b"0123456789";
        std::fs::write(&path, data).unwrap();

        let remote = MemoryRemote::new(4);
        let sent = remote
            .upload(&path, "k/f.bin", &md5_meta(data), None)
            .await
            .unwrap();
        assert_eq!(sent, 10);

        let HeadResult::Found(meta) = remote.head("k/f.bin").await.unwrap() else {
            panic!("object missing");
        };
        assert_eq!(meta.size, 10);
        assert_eq!(
            meta.stored_hash.as_deref(),
            Some(checksum_bytes(HashAlgorithm::Md5, data).as_str())
        );
        assert!(meta.composite_fingerprint.unwrap().ends_with("-3"));
    }

    #[tokio::test]
    async fn single_part_fingerprint_is_plain_hash() {
        let remote = MemoryRemote::new(1024);
        remote.insert_foreign("k", b"small".to_vec(), 1024);
        assert_eq!(
            remote.fingerprint_of("k").unwrap(),
            checksum_bytes(HashAlgorithm::Md5, b"small")
        );
        assert!(remote.stored_hash("k").is_none());
    }

    #[tokio::test]
    async fn sha256_stored_hash_keeps_md5_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"abc").unwrap();

        let remote = MemoryRemote::new(1024);
        let meta = UploadMetadata {
            algorithm: HashAlgorithm::Sha256,
            stored_hash: checksum_bytes(HashAlgorithm::Sha256, b"abc"),
        };
        remote.upload(&path, "k", &meta, None).await.unwrap();

        assert_eq!(remote.stored_hash("k").unwrap(), meta.stored_hash);
        assert_eq!(
            remote.fingerprint_of("k").unwrap(),
            checksum_bytes(HashAlgorithm::Md5, b"abc")
        );
    }

    #[tokio::test]
    async fn upload_reports_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let seen = Arc::new(Mutex::new(Vec::<TransferProgress>::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |p: TransferProgress| s.lock().unwrap().push(p));

        let remote = MemoryRemote::new(4);
        remote
            .upload(&path, "k", &md5_meta(b"abcdefgh"), Some(cb))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.transferred, 8);
        assert_eq!(last.total, 8);
    }

    #[tokio::test]
    async fn download_writes_file_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let remote = MemoryRemote::new(4);
        remote.insert_foreign("k", b"remote bytes".to_vec(), 4);

        let target = dir.path().join("out.bin");
        let got = remote.download("k", &target, None).await.unwrap();
        assert_eq!(got, 12);
        assert_eq!(std::fs::read(&target).unwrap(), b"remote bytes");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn injected_failures() {
        let remote = MemoryRemote::new(4);
        remote.fail_key("t", InjectedFailure::Transport);
        remote.fail_key("a", InjectedFailure::Auth);
        assert!(matches!(
            remote.head("t").await,
            Err(SyncError::Transport(_))
        ));
        assert!(matches!(remote.head("a").await, Err(SyncError::Auth(_))));
    }
}
