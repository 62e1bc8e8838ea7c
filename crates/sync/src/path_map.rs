//! Mapping between local paths and remote keys.
//!
//! A local file `<root>/a/b.txt` maps to the key `<prefix>/a/b.txt`. The
//! inverse walks the key's segments until it finds the boundary (the
//! prefix segments) and re-roots the remainder under the local root.

use std::path::{Component, Path, PathBuf};

use stowage_transfer::validate_relative_path;

use crate::error::SyncError;

/// Returns `path` relative to `root` as a `/`-separated string.
pub fn relative_path(root: &Path, path: &Path) -> Result<String, SyncError> {
    let rel = path.strip_prefix(root).map_err(|_| {
        SyncError::PathMapping(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment.to_str().ok_or_else(|| {
                    SyncError::PathMapping(format!("non UTF-8 path: {}", path.display()))
                })?;
                segments.push(segment);
            }
            other => {
                return Err(SyncError::PathMapping(format!(
                    "unexpected component {other:?} in {}",
                    path.display()
                )));
            }
        }
    }

    let joined = segments.join("/");
    validate_relative_path(&joined)?;
    Ok(joined)
}

/// Finds the first occurrence of `boundary` in `key`'s segments and returns
/// the segments after it, joined with `/`.
///
/// An empty boundary matches at the start of the key.
pub fn remainder_after(boundary: &[&str], key: &str) -> Result<String, SyncError> {
    let segments: Vec<&str> = key.split('/').collect();

    let start = if boundary.is_empty() {
        Some(0)
    } else {
        segments
            .windows(boundary.len())
            .position(|window| window == boundary)
            .map(|i| i + boundary.len())
    };

    let start = start.ok_or_else(|| {
        SyncError::PathMapping(format!(
            "boundary {:?} not found in key {key:?}",
            boundary.join("/")
        ))
    })?;

    let remainder = segments[start..].join("/");
    validate_relative_path(&remainder)
        .map_err(|e| SyncError::PathMapping(format!("key {key:?}: {e}")))?;
    Ok(remainder)
}

/// Maps files under a local root to keys under a remote prefix and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    local_root: PathBuf,
    prefix: Vec<String>,
}

impl PathMapper {
    /// Creates a mapper. Leading and trailing `/` on `remote_prefix` are
    /// ignored; an empty prefix maps to the store root.
    pub fn new(local_root: impl Into<PathBuf>, remote_prefix: &str) -> Result<Self, SyncError> {
        let trimmed = remote_prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            Vec::new()
        } else {
            validate_relative_path(trimmed).map_err(|e| {
                SyncError::Config(format!("remote prefix {remote_prefix:?}: {e}"))
            })?;
            trimmed.split('/').map(str::to_string).collect()
        };
        Ok(Self {
            local_root: local_root.into(),
            prefix,
        })
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Normalized remote prefix, without surrounding `/`.
    pub fn remote_prefix(&self) -> String {
        self.prefix.join("/")
    }

    /// Strips the local root from `file_path`.
    pub fn relative_path(&self, file_path: &Path) -> Result<String, SyncError> {
        relative_path(&self.local_root, file_path)
    }

    /// Remote key for a file under the local root.
    pub fn to_remote_key(&self, file_path: &Path) -> Result<String, SyncError> {
        let relative = self.relative_path(file_path)?;
        self.key_for_relative(&relative)
    }

    /// Remote key for a `/`-separated relative path.
    pub fn key_for_relative(&self, relative: &str) -> Result<String, SyncError> {
        validate_relative_path(relative)?;
        if self.prefix.is_empty() {
            Ok(relative.to_string())
        } else {
            Ok(format!("{}/{relative}", self.remote_prefix()))
        }
    }

    /// Relative path encoded in a remote key.
    pub fn relative_from_key(&self, remote_key: &str) -> Result<String, SyncError> {
        let boundary: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        remainder_after(&boundary, remote_key)
    }

    /// Local path for a remote key.
    pub fn to_local_path(&self, remote_key: &str) -> Result<PathBuf, SyncError> {
        let relative = self.relative_from_key(remote_key)?;
        Ok(relative
            .split('/')
            .fold(self.local_root.clone(), |path, segment| path.join(segment)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(prefix: &str) -> PathMapper {
        PathMapper::new("/home/user/photos", prefix).unwrap()
    }

    #[test]
    fn to_remote_key_reroots_under_prefix() {
        let m = mapper("backups/photos");
        let key = m
            .to_remote_key(Path::new("/home/user/photos/2024/img.jpg"))
            .unwrap();
        assert_eq!(key, "backups/photos/2024/img.jpg");
    }

    #[test]
    fn prefix_slashes_are_normalized() {
        let m = mapper("/backups/photos/");
        assert_eq!(m.remote_prefix(), "backups/photos");
        assert_eq!(m.key_for_relative("a.txt").unwrap(), "backups/photos/a.txt");
    }

    #[test]
    fn empty_prefix_maps_to_store_root() {
        let m = mapper("");
        assert_eq!(m.key_for_relative("a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(
            m.to_local_path("a/b.txt").unwrap(),
            PathBuf::from("/home/user/photos/a/b.txt")
        );
    }

    #[test]
    fn to_local_path_reroots_under_local_root() {
        let m = mapper("backups/photos");
        assert_eq!(
            m.to_local_path("backups/photos/2024/img.jpg").unwrap(),
            PathBuf::from("/home/user/photos/2024/img.jpg")
        );
    }

    #[test]
    fn round_trip_relative_paths() {
        for prefix in ["", "target", "deep/nested/target"] {
            let m = mapper(prefix);
            for rel in ["a.txt", "x/y/z.bin", ".hidden/file", "target/inner.txt"] {
                let local = m.local_root().join(rel);
                let key = m.to_remote_key(&local).unwrap();
                assert_eq!(m.relative_from_key(&key).unwrap(), rel);
                assert_eq!(m.to_local_path(&key).unwrap(), local, "prefix {prefix:?}");
            }
        }
    }

    #[test]
    fn boundary_found_after_foreign_segments() {
        assert_eq!(
            remainder_after(&["photos"], "mirror/photos/a/b.jpg").unwrap(),
            "a/b.jpg"
        );
    }

    #[test]
    fn missing_boundary_is_error() {
        let m = mapper("backups/photos");
        assert!(matches!(
            m.to_local_path("other/place/a.jpg"),
            Err(SyncError::PathMapping(_))
        ));
        // Partial prefix match is not a match.
        assert!(m.to_local_path("backups/a.jpg").is_err());
    }

    #[test]
    fn key_without_remainder_is_error() {
        let m = mapper("backups/photos");
        assert!(m.to_local_path("backups/photos").is_err());
        assert!(m.to_local_path("backups/photos/").is_err());
    }

    #[test]
    fn traversal_in_key_is_rejected() {
        let m = mapper("backups");
        assert!(m.to_local_path("backups/../../etc/passwd").is_err());
        assert!(m.key_for_relative("../escape").is_err());
    }

    #[test]
    fn file_outside_root_is_rejected() {
        let m = mapper("backups");
        assert!(matches!(
            m.to_remote_key(Path::new("/etc/passwd")),
            Err(SyncError::PathMapping(_))
        ));
    }

    #[test]
    fn invalid_prefix_is_config_error() {
        assert!(matches!(
            PathMapper::new("/root", "a/../b"),
            Err(SyncError::Config(_))
        ));
    }
}
