//! Content digests and multipart fingerprint emulation.
//!
//! Stores that upload large objects in parts publish a composite
//! fingerprint instead of a plain content hash: every part is hashed,
//! the raw part digests are concatenated in order, the concatenation is
//! hashed again and the part count is appended as `"<hex>-<parts>"`.
//! [`multipart_fingerprint`] reproduces that value from local content.

use std::fmt;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use sha2::Sha256;

use crate::TransferError;
use crate::chunked::ChunkReader;

// ---------------------------------------------------------------------------
// HashAlgorithm
// ---------------------------------------------------------------------------

/// Hash function used for digests and fingerprints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5, the algorithm behind object-store ETags.
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Short lowercase name (`md5`, `sha256`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of a hex digest for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    pub(crate) fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental hash state: update per chunk, finalize once.
pub(crate) enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    pub(crate) fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// How a [`Digest`] was derived from the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    /// One hash over the entire content.
    Whole,
    /// Hash of concatenated part hashes.
    Multipart { part_count: u64, part_size: u64 },
}

/// A locally computed content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: HashAlgorithm,
    hex: String,
    kind: DigestKind,
}

impl Digest {
    pub(crate) fn new(algorithm: HashAlgorithm, hex: String, kind: DigestKind) -> Self {
        Self {
            algorithm,
            hex,
            kind,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Lowercase hex of the (final) hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn kind(&self) -> DigestKind {
        self.kind
    }

    /// Compares against a remote hex string, ignoring case and ETag quotes.
    pub fn matches_hex(&self, other: &str) -> bool {
        self.hex.eq_ignore_ascii_case(other.trim().trim_matches('"'))
    }

    /// Remote-comparable form: bare hex for whole digests, `"<hex>-<parts>"`
    /// for multipart ones.
    pub fn fingerprint(&self) -> String {
        match self.kind {
            DigestKind::Whole => self.hex.clone(),
            DigestKind::Multipart { part_count, .. } => format!("{}-{}", self.hex, part_count),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.fingerprint())
    }
}

// ---------------------------------------------------------------------------
// MultipartFingerprint
// ---------------------------------------------------------------------------

/// A parsed remote composite fingerprint, `"<hex>-<part_count>"`.
///
/// The part count is always positive. It says nothing about the part size
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFingerprint {
    hex: String,
    part_count: u64,
}

impl MultipartFingerprint {
    /// Parses a fingerprint, tolerating the surrounding quotes ETags carry.
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let value = raw.trim().trim_matches('"');
        let malformed = || TransferError::MalformedFingerprint(raw.to_string());

        let (hex, count) = value.rsplit_once('-').ok_or_else(malformed)?;
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        let part_count: u64 = count.parse().map_err(|_| malformed())?;
        if part_count == 0 {
            return Err(malformed());
        }

        Ok(Self {
            hex: hex.to_ascii_lowercase(),
            part_count,
        })
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn part_count(&self) -> u64 {
        self.part_count
    }

    /// True when `digest` is multipart with the same part count and hash.
    pub fn matches(&self, digest: &Digest) -> bool {
        match digest.kind() {
            DigestKind::Multipart { part_count, .. } => {
                part_count == self.part_count && digest.matches_hex(&self.hex)
            }
            DigestKind::Whole => false,
        }
    }
}

impl fmt::Display for MultipartFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.hex, self.part_count)
    }
}

// ---------------------------------------------------------------------------
// Emulation
// ---------------------------------------------------------------------------

/// Incremental multipart fingerprint: feed parts in order, then finish.
pub struct MultipartHasher {
    algorithm: HashAlgorithm,
    concatenated: Vec<u8>,
    part_count: u64,
}

impl MultipartHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            concatenated: Vec::new(),
            part_count: 0,
        }
    }

    /// Hashes one part and appends its raw digest.
    pub fn update_part(&mut self, part: &[u8]) {
        let mut hasher = self.algorithm.hasher();
        hasher.update(part);
        self.concatenated.extend_from_slice(&hasher.finalize());
        self.part_count += 1;
    }

    /// Parts fed so far.
    pub fn part_count(&self) -> u64 {
        self.part_count
    }

    /// Hashes the concatenated part digests.
    ///
    /// With no parts fed, the content counts as one zero-length part, so
    /// the result always carries a part count suffix.
    pub fn finish(mut self, part_size: u64) -> Digest {
        if self.part_count == 0 {
            self.update_part(&[]);
        }
        let mut outer = self.algorithm.hasher();
        outer.update(&self.concatenated);
        Digest::new(
            self.algorithm,
            hex::encode(outer.finalize()),
            DigestKind::Multipart {
                part_count: self.part_count,
                part_size,
            },
        )
    }
}

/// Computes the multipart fingerprint of the reader's content, using the
/// reader's part size as the part boundary.
pub fn multipart_fingerprint(
    reader: ChunkReader,
    algorithm: HashAlgorithm,
) -> Result<Digest, TransferError> {
    let part_size = reader.part_size();
    let mut hasher = MultipartHasher::new(algorithm);
    for chunk in reader {
        hasher.update_part(&chunk?.data);
    }
    Ok(hasher.finish(part_size))
}

/// Number of parts a file of `size` bytes splits into at `part_size`.
///
/// Never less than one: an empty file is a single empty part.
pub fn part_count_for(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size.max(1)).max(1)
}

/// Back-solves the part size that most plausibly produced `part_count`
/// parts for a file of `size` bytes, rounded up to a multiple of `unit`.
pub fn recover_part_size(size: u64, part_count: u64, unit: u64) -> Result<u64, TransferError> {
    if unit == 0 {
        return Err(TransferError::InvalidPartSize(0));
    }
    if part_count == 0 {
        return Err(TransferError::MalformedFingerprint(format!(
            "zero part count for {size} bytes"
        )));
    }
    let step = part_count
        .checked_mul(unit)
        .ok_or(TransferError::InvalidPartSize(unit))?;
    Ok(size.div_ceil(step).max(1) * unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum_bytes;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn fingerprint_of(path: &Path, part_size: u64) -> Digest {
        let reader = ChunkReader::new(path, part_size).unwrap();
        multipart_fingerprint(reader, HashAlgorithm::Md5).unwrap()
    }

    /// Reference computation straight from the definition.
    fn reference(data: &[u8], part_size: usize) -> String {
        let mut concat = Vec::new();
        let mut parts = 0;
        for part in data.chunks(part_size) {
            concat.extend(hex::decode(checksum_bytes(HashAlgorithm::Md5, part)).unwrap());
            parts += 1;
        }
        if parts == 0 {
            concat.extend(hex::decode(checksum_bytes(HashAlgorithm::Md5, b"")).unwrap());
            parts = 1;
        }
        format!("{}-{}", checksum_bytes(HashAlgorithm::Md5, &concat), parts)
    }

    #[test]
    fn empty_file_is_one_part() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");

        let digest = fingerprint_of(&path, 8);
        assert_eq!(
            digest.kind(),
            DigestKind::Multipart {
                part_count: 1,
                part_size: 8
            }
        );
        // md5(md5("")) with the part count suffix.
        let inner = hex::decode("d41d8cd98f00b204e9800998ecf8427e").unwrap();
        let expected = format!("{}-1", checksum_bytes(HashAlgorithm::Md5, &inner));
        assert_eq!(digest.fingerprint(), expected);
    }

    #[test]
    fn small_file_keeps_suffix_and_differs_from_whole_hash() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "small.bin", b"hello");

        let digest = fingerprint_of(&path, 1024);
        assert!(digest.fingerprint().ends_with("-1"));
        assert_ne!(digest.hex(), checksum_bytes(HashAlgorithm::Md5, b"hello"));
    }

    #[test]
    fn matches_reference_definition() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..100u8).collect();
        let path = create_test_file(dir.path(), "ref.bin", &data);

        for part_size in [1usize, 7, 10, 50, 99, 100, 101] {
            assert_eq!(
                fingerprint_of(&path, part_size as u64).fingerprint(),
                reference(&data, part_size),
                "part size {part_size}"
            );
        }
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "d.bin", b"the same bytes every time");
        let a = fingerprint_of(&path, 5);
        let b = fingerprint_of(&path, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn part_size_changes_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "p.bin", b"0123456789abcdef");
        assert_ne!(fingerprint_of(&path, 4), fingerprint_of(&path, 8));
    }

    #[test]
    fn sha256_fingerprint_uses_sha256_parts() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "s.bin", b"abcdef");
        let reader = ChunkReader::new(&path, 3).unwrap();
        let digest = multipart_fingerprint(reader, HashAlgorithm::Sha256).unwrap();
        assert_eq!(digest.hex().len(), 64);
        assert_eq!(digest.algorithm(), HashAlgorithm::Sha256);
        assert!(digest.fingerprint().ends_with("-2"));
    }

    #[test]
    fn parse_valid_fingerprint() {
        let fp = MultipartFingerprint::parse("\"ABCDEF0123-12\"").unwrap();
        assert_eq!(fp.hex(), "abcdef0123");
        assert_eq!(fp.part_count(), 12);
        assert_eq!(fp.to_string(), "abcdef0123-12");
    }

    #[test]
    fn parse_rejects_malformed() {
        for raw in ["", "abc", "abc-", "-3", "xyz-2", "abc-0", "abc--1", "abc-two"] {
            assert!(
                MultipartFingerprint::parse(raw).is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn fingerprint_matches_digest() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "m.bin", b"0123456789");
        let digest = fingerprint_of(&path, 4);
        let remote = MultipartFingerprint::parse(&digest.fingerprint().to_uppercase()).unwrap();
        assert!(remote.matches(&digest));

        let wrong_count =
            MultipartFingerprint::parse(&format!("{}-2", digest.hex())).unwrap();
        assert!(!wrong_count.matches(&digest));
    }

    #[test]
    fn hasher_matches_reader_fingerprint() {
        let dir = TempDir::new().unwrap();
        let data = b"0123456789abcdefXYZ";
        let path = create_test_file(dir.path(), "h.bin", data);

        let mut hasher = MultipartHasher::new(HashAlgorithm::Md5);
        for part in data.chunks(8) {
            hasher.update_part(part);
        }
        assert_eq!(hasher.part_count(), 3);
        assert_eq!(hasher.finish(8), fingerprint_of(&path, 8));
    }

    #[test]
    fn part_count_for_sizes() {
        assert_eq!(part_count_for(0, 4), 1);
        assert_eq!(part_count_for(1, 4), 1);
        assert_eq!(part_count_for(4, 4), 1);
        assert_eq!(part_count_for(5, 4), 2);
        assert_eq!(part_count_for(8, 4), 2);
    }

    #[test]
    fn recover_exact_part_size() {
        let mib = 1024 * 1024;
        // Two full 8 MiB parts.
        assert_eq!(recover_part_size(16 * mib, 2, mib).unwrap(), 8 * mib);
        // Short last part still recovers the producing size.
        assert_eq!(recover_part_size(16 * mib - 10, 2, mib).unwrap(), 8 * mib);
        // Five parts of 5 MiB with a short tail.
        assert_eq!(recover_part_size(22 * mib, 5, mib).unwrap(), 5 * mib);
    }

    #[test]
    fn recover_never_returns_zero() {
        assert_eq!(recover_part_size(0, 1, 4).unwrap(), 4);
    }

    #[test]
    fn recover_rejects_bad_inputs() {
        assert!(recover_part_size(10, 1, 0).is_err());
        assert!(recover_part_size(10, 0, 4).is_err());
    }
}
