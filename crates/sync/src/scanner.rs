//! Local tree enumeration.
//!
//! Recursively walks the source root and produces a [`FileRef`] per
//! regular file. Symlinks and special files are skipped, and so are files
//! whose path cannot become a remote key (non UTF-8 names, backslashes).

use std::path::Path;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::path_map::relative_path;
use crate::types::FileRef;

/// Scans `root` recursively. Results are sorted by relative path.
pub fn scan_tree(root: &Path) -> Result<Vec<FileRef>, SyncError> {
    let mut files = Vec::new();
    walk_dir(root, root, &mut files)?;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    debug!(
        root = %root.display(),
        files = files.len(),
        total_bytes = files.iter().map(|f| f.size).sum::<u64>(),
        "scan complete"
    );
    Ok(files)
}

fn walk_dir(root: &Path, current: &Path, files: &mut Vec<FileRef>) -> Result<(), SyncError> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, files)?;
        } else if metadata.is_file() {
            match relative_path(root, &path) {
                Ok(relative_path) => files.push(FileRef {
                    relative_path,
                    size: metadata.len(),
                    path,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unmappable file"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::write(root.join("notes.txt"), b"NOTES").unwrap();
        fs::write(root.join("readme.md"), b"READ").unwrap();

        fs::create_dir_all(root.join("photos").join("2024")).unwrap();
        fs::write(root.join("photos").join("cover.jpg"), b"JPG").unwrap();
        fs::write(
            root.join("photos").join("2024").join("img_001.raw"),
            b"RAW_DATA_HERE",
        )
        .unwrap();

        dir
    }

    #[test]
    fn scan_finds_all_files_sorted() {
        let dir = create_test_tree();
        let files = scan_tree(dir.path()).unwrap();

        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "notes.txt",
                "photos/2024/img_001.raw",
                "photos/cover.jpg",
                "readme.md"
            ]
        );
    }

    #[test]
    fn scan_records_sizes_and_absolute_paths() {
        let dir = create_test_tree();
        let files = scan_tree(dir.path()).unwrap();

        let raw = files
            .iter()
            .find(|f| f.relative_path == "photos/2024/img_001.raw")
            .unwrap();
        assert_eq!(raw.size, 13);
        assert_eq!(raw.path, dir.path().join("photos").join("2024").join("img_001.raw"));
        assert!(raw.path.is_absolute());
    }

    #[test]
    fn scan_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(scan_tree(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            scan_tree(&dir.path().join("nope")),
            Err(SyncError::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn scan_skips_unmappable_names() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.txt"), b"ok").unwrap();
        fs::write(dir.path().join("odd\\name.txt"), b"bad").unwrap();

        let files = scan_tree(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["good.txt"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn scan_skips_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("good.txt"), b"ok").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"bad\xff.txt")), b"bad").unwrap();

        let files = scan_tree(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "good.txt");
    }
}
