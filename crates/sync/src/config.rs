//! Run configuration, supplied read-only by the caller.
//!
//! The core never reads environment variables or prompts; the binary
//! deserializes this from its TOML file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stowage_transfer::{DEFAULT_PART_SIZE, DEFAULT_PART_SIZE_UNIT, HashAlgorithm};

use crate::error::SyncError;

/// Synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local source root.
    pub source: PathBuf,

    /// Remote target prefix (empty = store root).
    #[serde(default)]
    pub target: String,

    /// Part size for new fingerprints and multipart uploads.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Granularity used when back-solving a remote part size.
    #[serde(default = "default_part_size_unit")]
    pub part_size_unit: u64,

    /// Maximum files processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Transfer files whose comparison is unverifiable.
    #[serde(default)]
    pub force: bool,

    /// Overall deadline for a run, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_part_size_unit() -> u64 {
    DEFAULT_PART_SIZE_UNIT
}

fn default_workers() -> usize {
    4
}

impl SyncConfig {
    /// Creates a config with defaults for everything but the two roots.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            part_size: default_part_size(),
            part_size_unit: default_part_size_unit(),
            workers: default_workers(),
            hash_algorithm: HashAlgorithm::default(),
            force: false,
            deadline_secs: None,
        }
    }

    /// Rejects settings the engine cannot work with.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.source.as_os_str().is_empty() {
            return Err(SyncError::Config("source path is empty".into()));
        }
        if self.part_size == 0 {
            return Err(SyncError::Config("part_size must be positive".into()));
        }
        if self.part_size_unit == 0 {
            return Err(SyncError::Config("part_size_unit must be positive".into()));
        }
        if usize::try_from(self.part_size).is_err() {
            return Err(SyncError::Config(format!(
                "part_size {} does not fit in memory",
                self.part_size
            )));
        }
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be positive".into()));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_from_minimal_toml() {
        let config: SyncConfig = toml::from_str(r#"source = "/data/photos""#).unwrap();
        assert_eq!(config.source, PathBuf::from("/data/photos"));
        assert_eq!(config.target, "");
        assert_eq!(config.part_size, 16 * 1024 * 1024);
        assert_eq!(config.part_size_unit, 1024 * 1024);
        assert_eq!(config.workers, 4);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Md5);
        assert!(!config.force);
        assert!(config.deadline().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn full_toml() {
        let config: SyncConfig = toml::from_str(
            r#"
            source = "/srv/site"
            target = "backups/site"
            part_size = 8388608
            workers = 8
            hash_algorithm = "sha256"
            force = true
            deadline_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.target, "backups/site");
        assert_eq!(config.part_size, 8 * 1024 * 1024);
        assert_eq!(config.workers, 8);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert!(config.force);
        assert_eq!(config.deadline(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn validate_rejects_zeroes() {
        let mut config = SyncConfig::new("/src", "dst");
        config.part_size = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::new("/src", "dst");
        config.part_size_unit = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new("/src", "dst");
        config.workers = 0;
        assert!(config.validate().is_err());

        assert!(SyncConfig::new("", "dst").validate().is_err());
    }
}
