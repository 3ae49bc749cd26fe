//! File stamps used for change detection between backups.
//!
//! A stamp is the (size, modification time) pair of a file. Two stamps that
//! match exactly mean the file is considered unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::time::SystemTime;

/// Absolute path -> stamp, captured once per completed backup.
pub type ChecksumIndex = BTreeMap<String, FileStamp>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// File size in bytes
    pub size: u64,

    /// Last modified time (seconds since Unix epoch, negative before it)
    pub modified: i64,
}

impl FileStamp {
    pub fn from_metadata(metadata: &fs::Metadata) -> std::io::Result<Self> {
        let modified = match metadata.modified()?.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(after) => after.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        };

        Ok(Self {
            size: metadata.len(),
            modified,
        })
    }
}

/// True when the file is unchanged relative to a previous snapshot.
pub fn unchanged(previous: &ChecksumIndex, path: &str, current: &FileStamp) -> bool {
    previous.get(path) == Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_extract_stamp() -> std::io::Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        temp_file.write_all(b"test content")?;
        temp_file.flush()?;

        let stamp = FileStamp::from_metadata(&fs::metadata(temp_file.path())?)?;

        assert_eq!(stamp.size, 12);
        assert!(stamp.modified > 0);

        Ok(())
    }

    #[test]
    fn test_unchanged_needs_size_and_mtime() {
        let mut index = ChecksumIndex::new();
        index.insert("/a".into(), FileStamp { size: 10, modified: 5 });

        assert!(unchanged(&index, "/a", &FileStamp { size: 10, modified: 5 }));
        assert!(!unchanged(&index, "/a", &FileStamp { size: 10, modified: 6 }));
        assert!(!unchanged(&index, "/a", &FileStamp { size: 11, modified: 5 }));
        assert!(!unchanged(&index, "/b", &FileStamp { size: 10, modified: 5 }));
    }
}
