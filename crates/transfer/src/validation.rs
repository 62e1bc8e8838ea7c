use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a `/`-separated relative path stays inside the root it
/// is joined to and maps one-to-one onto a remote key suffix.
///
/// Rejects:
/// - Empty paths and empty segments (`a//b`, leading or trailing `/`)
/// - `.` and `..` segments
/// - Backslash separators
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_relative_path(relative: &str) -> Result<(), TransferError> {
    if relative.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if relative.contains('\\') {
        return Err(TransferError::InvalidPath(format!(
            "backslash separator not allowed: {relative}"
        )));
    }

    for segment in relative.split('/') {
        match segment {
            "" => {
                return Err(TransferError::InvalidPath(format!(
                    "empty segment or absolute path not allowed: {relative}"
                )));
            }
            "." => {
                return Err(TransferError::InvalidPath(format!(
                    "current directory segment not allowed: {relative}"
                )));
            }
            ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {relative}"
                )));
            }
            _ => {}
        }
    }

    if Path::new(relative)
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(TransferError::InvalidPath(format!(
            "path prefix not allowed: {relative}"
        )));
    }

    Ok(())
}
