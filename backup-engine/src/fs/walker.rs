//! Content tree traversal with exclusion rules.
//!
//! Directories are pruned before they are descended into, so excluded
//! subtrees cost nothing. Unreadable entries are logged and skipped: a live
//! tree changes under the walk and one bad entry must not sink the scan.

use crate::config::ScanConfig;
use crate::fs::metadata::FileStamp;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Directory names never descended into
    pub excluded_dir_names: Vec<String>,

    /// Absolute directories never descended into (the backup output root)
    pub excluded_roots: Vec<PathBuf>,

    /// Path substrings; matching files and directories are skipped
    pub exclude_patterns: Vec<String>,
}

impl WalkOptions {
    /// Options for scanning the content root, excluding our own output directory.
    pub fn from_scan_config(scan: &ScanConfig, backup_root: &Path) -> Self {
        let mut excluded_dir_names = scan.excluded_dir_names.clone();
        excluded_dir_names.extend(scan.sibling_tool_dirs.iter().cloned());

        Self {
            follow_links: scan.follow_links,
            excluded_dir_names,
            excluded_roots: vec![backup_root.to_path_buf()],
            exclude_patterns: scan.exclude_patterns.clone(),
        }
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    pub stamp: FileStamp,
}

impl FileInfo {
    /// For symlinks, resolves to the target to get the real file size.
    /// Returns None if the target is a directory or cannot be resolved.
    fn from_entry(entry: &DirEntry) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => resolved,
                Err(_) => return Ok(None),
            }
        } else {
            entry.metadata()?
        };

        Ok(Some(Self {
            stamp: FileStamp::from_metadata(&metadata)?,
            path,
        }))
    }
}

/// Walk a directory tree with a callback for each regular file.
///
/// Returns the number of entries that could not be read and were skipped.
pub fn walk_directory_with_callback<F>(root: &Path, options: &WalkOptions, mut callback: F) -> usize
where
    F: FnMut(FileInfo),
{
    let mut errors = 0;
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !should_exclude(entry, options));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {e}");
                errors += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match FileInfo::from_entry(&entry) {
            Ok(Some(info)) => callback(info),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Skipping {}: {e}", entry.path().display());
                errors += 1;
            }
        }
    }

    errors
}

fn should_exclude(entry: &DirEntry, options: &WalkOptions) -> bool {
    let path = entry.path();

    if entry.file_type().is_dir() {
        let name = entry.file_name().to_string_lossy();
        if options.excluded_dir_names.iter().any(|n| *n == name) {
            return true;
        }
        if options.excluded_roots.iter().any(|r| path == r.as_path()) {
            return true;
        }
    }

    let path_str = path.to_string_lossy();
    options
        .exclude_patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && path_str.contains(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn walk_directory(root: &Path, options: &WalkOptions) -> Vec<FileInfo> {
        let mut files = Vec::new();
        assert_eq!(walk_directory_with_callback(root, options, |file| files.push(file)), 0);
        files
    }

    fn relative_names(root: &Path, files: &[FileInfo]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_walk_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let files = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(files.len(), 0);
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content22")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default());
        assert_eq!(relative_names(temp_dir.path(), &files), vec!["file1.txt", "subdir/file2.txt"]);
        assert_eq!(files[1].stamp.size, 9);

        Ok(())
    }

    #[test]
    fn test_exclusion_rules() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        for dir in [".git", "node_modules", "updraft", "backups", "uploads/cache"] {
            fs::create_dir_all(root.join(dir))?;
            fs::write(root.join(dir).join("f.txt"), b"x")?;
        }
        fs::write(root.join("keep.txt"), b"keep")?;
        fs::write(root.join("uploads/photo.jpg"), b"jpg")?;

        let mut scan = ScanConfig::default();
        scan.exclude_patterns = vec!["uploads/cache".to_string()];
        let options = WalkOptions::from_scan_config(&scan, &root.join("backups"));

        let files = walk_directory(root, &options);
        assert_eq!(relative_names(root, &files), vec!["keep.txt", "uploads/photo.jpg"]);

        Ok(())
    }
}
