//! Size-bounded, numbered output files.
//!
//! Both writers reopen a chunk at the length recorded in the job state and
//! drop whatever lies beyond it. Those bytes came from a batch that died
//! before persisting its progress and will be written again.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tar::{Builder, Header, HeaderMode};

const BLOCK: u64 = 512;
/// Two zero blocks close a tar stream
const TAR_END_MARKER: u64 = 2 * BLOCK;

/// A numbered family of chunk files, e.g. `database/db-0001.sql`.
#[derive(Debug, Clone)]
pub struct ChunkSeries {
    dir: PathBuf,
    prefix: &'static str,
    extension: &'static str,
}

impl ChunkSeries {
    pub fn sql(work_dir: &Path) -> Self {
        Self {
            dir: work_dir.join("database"),
            prefix: "db",
            extension: "sql",
        }
    }

    pub fn archive(work_dir: &Path) -> Self {
        Self {
            dir: work_dir.join("files"),
            prefix: "files",
            extension: "tar",
        }
    }

    pub fn path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("{}-{:04}.{}", self.prefix, index, self.extension))
    }

    /// Existing chunk files in index order.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut chunks: Vec<(u32, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| {
                let index = path.file_name().and_then(|n| n.to_str()).and_then(|n| self.index_of(n))?;
                Some((index, path))
            })
            .collect();
        // Numeric order: names stop sorting correctly past the padded width
        chunks.sort_by_key(|(index, _)| *index);
        Ok(chunks.into_iter().map(|(_, path)| path).collect())
    }

    fn index_of(&self, file_name: &str) -> Option<u32> {
        file_name
            .strip_prefix(self.prefix)?
            .strip_prefix('-')?
            .strip_suffix(self.extension)?
            .strip_suffix('.')?
            .parse()
            .ok()
    }
}

/// The run's work directory must already exist. Only the chunk directory
/// inside it is created, so a cancelled run's deleted work directory stays gone.
fn open_at(path: &Path, committed: u64) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        match fs::create_dir(parent) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    file.set_len(committed)?;
    file.seek(SeekFrom::End(0))?;
    Ok(file)
}

// ── SQL dump chunks ──

pub struct SqlChunkWriter {
    series: ChunkSeries,
    threshold: u64,
    index: u32,
    out: BufWriter<File>,
    bytes: u64,
}

impl SqlChunkWriter {
    pub fn open(series: ChunkSeries, index: u32, committed: u64, threshold: u64) -> io::Result<Self> {
        let file = open_at(&series.path(index), committed)?;
        Ok(Self {
            series,
            threshold,
            index,
            out: BufWriter::new(file),
            bytes: committed,
        })
    }

    /// Append one statement. A full chunk is closed first, so a chunk only
    /// ever overshoots the threshold by its last record.
    pub fn write_record(&mut self, record: &str) -> io::Result<()> {
        if self.bytes > 0 && self.bytes >= self.threshold {
            self.roll()?;
        }
        self.out.write_all(record.as_bytes())?;
        self.bytes += record.len() as u64;
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.index += 1;
        tracing::debug!("Rolling SQL dump to chunk {}", self.index);
        self.out = BufWriter::new(open_at(&self.series.path(self.index), 0)?);
        self.bytes = 0;
        Ok(())
    }

    /// Flush and return the position to persist: (chunk index, committed bytes).
    pub fn finish(mut self) -> io::Result<(u32, u64)> {
        self.out.flush()?;
        self.out.get_ref().sync_data()?;
        Ok((self.index, self.bytes))
    }
}

// ── Archive chunks ──

pub struct ArchiveChunkWriter {
    series: ChunkSeries,
    threshold: u64,
    index: u32,
    builder: Builder<File>,
    /// Stream length without the end marker
    bytes: u64,
}

impl ArchiveChunkWriter {
    /// Reopen chunk `index` for appending. `committed` includes the end
    /// marker written by the previous `finish`, which is dropped again here.
    pub fn open(series: ChunkSeries, index: u32, committed: u64, threshold: u64) -> io::Result<Self> {
        let resume_at = committed.saturating_sub(TAR_END_MARKER);
        let file = open_at(&series.path(index), resume_at)?;
        Ok(Self {
            series,
            threshold,
            index,
            builder: Builder::new(file),
            bytes: resume_at,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Add `path` to the archive under `name`, rolling to a new chunk first
    /// when the entry would push the current one past the threshold.
    pub fn append_file(&mut self, path: &Path, name: &Path) -> io::Result<()> {
        let mut file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        let size = metadata.len();

        if self.bytes > 0 && self.bytes + entry_estimate(name, size) + TAR_END_MARKER > self.threshold {
            self.roll()?;
        }

        let start = self.bytes;
        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&metadata, HeaderMode::Complete);
        header.set_size(size);

        // The file may change between stat and read; never copy more than the header declares
        let written = self
            .builder
            .append_data(&mut header, name, (&mut file).take(size))
            .and_then(|_| self.builder.get_mut().stream_position());

        match written {
            Ok(end) if end - start >= BLOCK + padded(size) => {
                self.bytes = end;
                Ok(())
            }
            Ok(_) => {
                self.rewind_to(start)?;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank while being archived", path.display()),
                ))
            }
            Err(e) => {
                self.rewind_to(start)?;
                Err(e)
            }
        }
    }

    fn rewind_to(&mut self, position: u64) -> io::Result<()> {
        let file = self.builder.get_mut();
        file.set_len(position)?;
        file.seek(SeekFrom::Start(position))?;
        self.bytes = position;
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        let next = self.index + 1;
        let file = open_at(&self.series.path(next), 0)?;
        let previous = std::mem::replace(&mut self.builder, Builder::new(file));
        previous.into_inner()?.sync_data()?;
        tracing::debug!("Rolling archive to chunk {next}");
        self.index = next;
        self.bytes = 0;
        Ok(())
    }

    /// Close the tar stream and return (chunk index, committed bytes).
    pub fn finish(self) -> io::Result<(u32, u64)> {
        let file = self.builder.into_inner()?;
        file.sync_data()?;
        Ok((self.index, self.bytes + TAR_END_MARKER))
    }
}

fn padded(size: u64) -> u64 {
    size.div_ceil(BLOCK) * BLOCK
}

/// Bytes an entry takes in the stream: header, GNU long-name record, data.
fn entry_estimate(name: &Path, size: u64) -> u64 {
    let name_len = name.as_os_str().len() as u64;
    let long_name = if name_len > 100 { BLOCK + padded(name_len + 1) } else { 0 };
    BLOCK + long_name + padded(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_sql_chunk_rolls_over_threshold() {
        let dir = TempDir::new().unwrap();
        let series = ChunkSeries::sql(dir.path());
        let mut writer = SqlChunkWriter::open(series.clone(), 1, 0, 100).unwrap();

        let record = format!("{};\n", "x".repeat(38)); // 40 bytes
        for _ in 0..7 {
            writer.write_record(&record).unwrap();
        }
        let (index, bytes) = writer.finish().unwrap();

        assert_eq!(index, 3);
        assert_eq!(bytes, 40);
        let chunks = series.list().unwrap();
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(fs::metadata(chunk).unwrap().len() <= 100 + 40);
        }
        assert!(chunks[0].ends_with("database/db-0001.sql"));
    }

    #[test]
    fn test_list_orders_by_numeric_index() {
        let dir = TempDir::new().unwrap();
        let series = ChunkSeries::sql(dir.path());
        fs::create_dir(dir.path().join("database")).unwrap();
        for index in [10000, 2, 9999, 1] {
            fs::write(series.path(index), b"").unwrap();
        }
        fs::write(dir.path().join("database/db-notes.sql"), b"").unwrap();
        fs::write(dir.path().join("database/files-0003.tar"), b"").unwrap();

        let expected: Vec<PathBuf> = [1, 2, 9999, 10000].into_iter().map(|i| series.path(i)).collect();
        assert_eq!(series.list().unwrap(), expected);
    }

    #[test]
    fn test_open_does_not_recreate_removed_work_dir() {
        let dir = TempDir::new().unwrap();
        let work_dir = dir.path().join("run");
        fs::create_dir(&work_dir).unwrap();
        fs::remove_dir(&work_dir).unwrap();

        let err = SqlChunkWriter::open(ChunkSeries::sql(&work_dir), 1, 0, 1 << 20).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        let err = ArchiveChunkWriter::open(ChunkSeries::archive(&work_dir), 1, 0, 1 << 20).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!work_dir.exists());
    }

    #[test]
    fn test_sql_reopen_drops_uncommitted_tail() {
        let dir = TempDir::new().unwrap();
        let series = ChunkSeries::sql(dir.path());

        let mut writer = SqlChunkWriter::open(series.clone(), 1, 0, 1 << 20).unwrap();
        writer.write_record("A;\n").unwrap();
        let (index, committed) = writer.finish().unwrap();

        // A batch that died before saving its position
        let mut zombie = SqlChunkWriter::open(series.clone(), index, committed, 1 << 20).unwrap();
        zombie.write_record("B;\n").unwrap();
        zombie.finish().unwrap();

        let mut writer = SqlChunkWriter::open(series.clone(), index, committed, 1 << 20).unwrap();
        writer.write_record("C;\n").unwrap();
        writer.finish().unwrap();

        assert_eq!(fs::read_to_string(series.path(1)).unwrap(), "A;\nC;\n");
    }

    #[test]
    fn test_archive_second_file_starts_new_chunk() {
        let dir = TempDir::new().unwrap();
        let content = dir.path().join("content");
        fs::create_dir_all(&content).unwrap();
        fs::write(content.join("a.bin"), vec![1u8; 30 * 1024]).unwrap();
        fs::write(content.join("b.bin"), vec![2u8; 30 * 1024]).unwrap();

        let series = ChunkSeries::archive(dir.path());
        let mut writer = ArchiveChunkWriter::open(series.clone(), 1, 0, 50 * 1024).unwrap();
        writer.append_file(&content.join("a.bin"), Path::new("a.bin")).unwrap();
        assert_eq!(writer.index(), 1);
        writer.append_file(&content.join("b.bin"), Path::new("b.bin")).unwrap();
        assert_eq!(writer.index(), 2);
        let (index, _) = writer.finish().unwrap();
        assert_eq!(index, 2);

        assert_eq!(entry_names(&series.path(1)), vec!["a.bin"]);
        assert_eq!(entry_names(&series.path(2)), vec!["b.bin"]);
    }

    #[test]
    fn test_archive_resume_appends_after_committed_entries() {
        let dir = TempDir::new().unwrap();
        for name in ["one.txt", "two.txt", "ghost.txt", "three.txt"] {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let series = ChunkSeries::archive(dir.path());
        let limit = 1 << 20;

        let mut writer = ArchiveChunkWriter::open(series.clone(), 1, 0, limit).unwrap();
        writer.append_file(&dir.path().join("one.txt"), Path::new("one.txt")).unwrap();
        let (_, committed) = writer.finish().unwrap();

        let mut writer = ArchiveChunkWriter::open(series.clone(), 1, committed, limit).unwrap();
        writer.append_file(&dir.path().join("two.txt"), Path::new("two.txt")).unwrap();
        let (_, committed) = writer.finish().unwrap();

        // Lost batch: written but never committed
        let mut zombie = ArchiveChunkWriter::open(series.clone(), 1, committed, limit).unwrap();
        zombie.append_file(&dir.path().join("ghost.txt"), Path::new("ghost.txt")).unwrap();
        zombie.finish().unwrap();

        let mut writer = ArchiveChunkWriter::open(series.clone(), 1, committed, limit).unwrap();
        writer.append_file(&dir.path().join("three.txt"), Path::new("three.txt")).unwrap();
        let (_, final_len) = writer.finish().unwrap();

        assert_eq!(fs::metadata(series.path(1)).unwrap().len(), final_len);
        assert_eq!(
            entry_names(&series.path(1)),
            vec!["one.txt", "two.txt", "three.txt"]
        );
    }

    #[test]
    fn test_archive_missing_file_leaves_chunk_intact() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), b"real").unwrap();
        let series = ChunkSeries::archive(dir.path());

        let mut writer = ArchiveChunkWriter::open(series.clone(), 1, 0, 1 << 20).unwrap();
        let err = writer
            .append_file(&dir.path().join("gone.txt"), Path::new("gone.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        writer.append_file(&dir.path().join("real.txt"), Path::new("real.txt")).unwrap();
        writer.finish().unwrap();

        assert_eq!(entry_names(&series.path(1)), vec!["real.txt"]);
    }
}
