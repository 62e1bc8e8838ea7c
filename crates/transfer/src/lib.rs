//! Chunked file reads, content digests and transfer progress.
//!
//! Everything here is synchronous and side-effect free apart from the
//! file read cursor. Callers in async contexts run the digest functions
//! on the blocking pool.

mod chunked;
mod fingerprint;
mod progress;
mod validation;

pub use chunked::{Chunk, ChunkReader, checksum_bytes, whole_object_digest};
pub use fingerprint::{
    Digest, DigestKind, HashAlgorithm, MultipartFingerprint, MultipartHasher, multipart_fingerprint,
    part_count_for, recover_part_size,
};
pub use progress::{ProgressCallback, ProgressTracker, SpeedCalculator, TransferProgress};
pub use validation::validate_relative_path;

/// Default part size for new fingerprints and multipart uploads: 16 MiB.
pub const DEFAULT_PART_SIZE: u64 = 16 * 1024 * 1024;

/// Granularity used when back-solving a remote part size: 1 MiB.
///
/// Multipart clients pick part sizes in whole mebibytes.
pub const DEFAULT_PART_SIZE_UNIT: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid part size: {0}")]
    InvalidPartSize(u64),

    #[error("malformed fingerprint: {0}")]
    MalformedFingerprint(String),

    #[error("cancelled")]
    Cancelled,
}
