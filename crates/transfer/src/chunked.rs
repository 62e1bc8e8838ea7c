use std::fs::File;
use std::io::Read;
use std::iter::FusedIterator;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::TransferError;
use crate::fingerprint::{Digest, DigestKind, HashAlgorithm};

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A contiguous slice of file content.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Size of this chunk in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Hashes `data` in one shot and returns the lowercase hex digest.
pub fn checksum_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Folds a chunk stream into a single whole-object digest.
///
/// The result depends only on the bytes, never on how they were chunked.
pub fn whole_object_digest<I>(chunks: I, algorithm: HashAlgorithm) -> Result<Digest, TransferError>
where
    I: IntoIterator<Item = Result<Chunk, TransferError>>,
{
    let mut hasher = algorithm.hasher();
    for chunk in chunks {
        hasher.update(&chunk?.data);
    }
    Ok(Digest::new(
        algorithm,
        hex::encode(hasher.finalize()),
        DigestKind::Whole,
    ))
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Streams a file front to back in fixed-size chunks.
///
/// Every chunk is exactly `part_size` bytes except the last, which holds
/// the remainder. An empty file yields no chunks. The reader is not
/// restartable: once it returns `None` or an error it stays exhausted.
pub struct ChunkReader {
    file: File,
    part_size: u64,
    offset: u64,
    file_size: u64,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub fn new(path: &Path, part_size: u64) -> Result<Self, TransferError> {
        if part_size == 0 || usize::try_from(part_size).is_err() {
            return Err(TransferError::InvalidPartSize(part_size));
        }
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            part_size,
            offset: 0,
            file_size,
            cancel: None,
            done: false,
        })
    }

    /// Aborts the stream with [`TransferError::Cancelled`] once `cancel` fires.
    ///
    /// The token is checked before every read.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Part size this reader was opened with.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size observed when the reader was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }

    fn read_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(TransferError::Cancelled);
        }

        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        // part_size fits in usize (checked in `new`), so the min does too.
        let read_size = remaining.min(self.part_size) as usize;
        let mut data = vec![0u8; read_size];
        // A file truncated mid-stream surfaces as UnexpectedEof.
        self.file.read_exact(&mut data)?;

        let chunk = Chunk {
            offset: self.offset,
            data,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for ChunkReader {}
