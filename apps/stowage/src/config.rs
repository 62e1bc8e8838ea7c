//! Command-line configuration.
//!
//! Configuration is stored as TOML with a `[sync]` and an `[s3]` table:
//!
//! ```toml
//! [sync]
//! source = "/home/me/photos"
//! target = "backups/photos"
//! workers = 8
//!
//! [s3]
//! bucket = "my-bucket"
//! region = "eu-west-1"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stowage_s3::S3Config;
use stowage_sync::SyncConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "stowage.toml";

/// Whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sync: SyncConfig,
    pub s3: S3Config,
}

impl Config {
    /// Loads and validates the configuration at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("reading configuration {}: {e}", path.display())
        })?;
        let config: Config = toml::from_str(&content)?;
        config.sync.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Resolves the configuration path: `--config` (or `STOWAGE_CONFIG`),
/// then `stowage.toml`.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
