use crate::executor::cursor::TableCursor;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Most skip reasons retained in the job state; counters keep counting past it.
const MAX_SKIP_REASONS: usize = 50;

// ── Step / JobType ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Db,
    FileScan,
    Archive,
    Finish,
}

impl Step {
    /// Stage after this one. Database-only runs go straight from DB to FINISH.
    pub fn next(self, job_type: JobType) -> Step {
        match (self, job_type.includes_files()) {
            (Step::Db, true) => Step::FileScan,
            (Step::Db, false) => Step::Finish,
            (Step::FileScan, _) => Step::Archive,
            (Step::Archive, _) | (Step::Finish, _) => Step::Finish,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Db => "DB",
            Step::FileScan => "FILE_SCAN",
            Step::Archive => "ARCHIVE",
            Step::Finish => "FINISH",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Full,
    Incremental,
    DbOnly,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Full => "full",
            JobType::Incremental => "incremental",
            JobType::DbOnly => "db_only",
        }
    }

    pub fn includes_files(self) -> bool {
        !matches!(self, JobType::DbOnly)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(JobType::Full),
            "incremental" => Ok(JobType::Incremental),
            "db_only" => Ok(JobType::DbOnly),
            other => Err(EngineError::InvalidInput(format!("unknown job type '{other}'"))),
        }
    }
}

impl ToSql for JobType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for JobType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: EngineError| FromSqlError::Other(e.to_string().into()))
    }
}

// ── SkipStats ──

/// Work given up on so the run could keep moving. Reported, never hidden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipStats {
    pub tables: u32,
    pub chunks: u32,
    pub files: u64,
    pub reasons: Vec<String>,
}

impl SkipStats {
    pub fn is_empty(&self) -> bool {
        self.tables == 0 && self.chunks == 0 && self.files == 0
    }

    pub fn table(&mut self, table: &str, reason: impl fmt::Display) {
        self.tables += 1;
        self.note(format!("table {table}: {reason}"));
    }

    pub fn chunk(&mut self, files: u64, reason: impl fmt::Display) {
        self.chunks += 1;
        self.files += files;
        self.note(format!("archive chunk ({files} files): {reason}"));
    }

    pub fn file(&mut self, path: &str, reason: impl fmt::Display) {
        self.files += 1;
        self.note(format!("file {path}: {reason}"));
    }

    /// Entries the directory walk could not read.
    pub fn unreadable(&mut self, count: u64) {
        if count > 0 {
            self.files += count;
            self.note(format!("{count} unreadable entries during file scan"));
        }
    }

    fn note(&mut self, reason: String) {
        if self.reasons.len() < MAX_SKIP_REASONS {
            self.reasons.push(reason);
        }
    }
}

// ── JobState ──

/// The one in-flight backup run, read and written only under the execution lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub step: Step,
    pub job_type: JobType,
    pub session_id: String,
    /// Id of the catalog record this run creates when it finishes
    pub backup_id: String,
    pub tables: Vec<String>,
    pub current_table_index: usize,
    /// Unset until the current table is first visited
    pub cursor: Option<TableCursor>,
    pub rows_exported: u64,
    pub sql_chunk_index: u32,
    /// Committed length of the current SQL chunk
    pub sql_chunk_bytes: u64,
    pub archive_chunk_index: u32,
    /// Committed length of the current archive chunk, end marker included
    pub archive_chunk_bytes: u64,
    pub file_list: Vec<PathBuf>,
    pub file_offset: usize,
    pub files_archived: u64,
    pub work_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub skipped: SkipStats,
}

impl JobState {
    pub fn new(job_type: JobType, session_id: &str, tables: Vec<String>, work_dir: PathBuf) -> Self {
        Self {
            step: Step::Db,
            job_type,
            session_id: session_id.to_string(),
            backup_id: Uuid::new_v4().to_string(),
            tables,
            current_table_index: 0,
            cursor: None,
            rows_exported: 0,
            sql_chunk_index: 1,
            sql_chunk_bytes: 0,
            archive_chunk_index: 1,
            archive_chunk_bytes: 0,
            file_list: Vec::new(),
            file_offset: 0,
            files_archived: 0,
            work_dir,
            started_at: Utc::now(),
            skipped: SkipStats::default(),
        }
    }

    pub fn current_table(&self) -> Option<&str> {
        self.tables.get(self.current_table_index).map(String::as_str)
    }

    /// Move to the next table and forget the cursor of the finished one.
    pub fn advance_table(&mut self) {
        self.current_table_index += 1;
        self.cursor = None;
    }
}

fn decode(payload: &str) -> Result<JobState> {
    serde_json::from_str(payload).map_err(|e| EngineError::CorruptState(e.to_string()))
}

pub fn load(conn: &Connection) -> Result<Option<JobState>> {
    let payload: Option<String> = conn
        .query_row("SELECT payload FROM job_state WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    payload.as_deref().map(decode).transpose()
}

/// Create the job state. Returns false when a run already exists.
pub fn insert(conn: &Connection, state: &JobState) -> Result<bool> {
    let payload = serde_json::to_string(state)?;
    let changes = conn.execute(
        "INSERT OR IGNORE INTO job_state (id, session_id, payload, updated_at) VALUES (1, ?1, ?2, ?3)",
        params![state.session_id, payload, Utc::now().to_rfc3339()],
    )?;
    Ok(changes == 1)
}

/// Write back the state only if the stored run still belongs to the same session.
/// A cancelled or replaced run turns this into a no-op.
pub fn save_if_owned(conn: &Connection, state: &JobState) -> Result<bool> {
    let payload = serde_json::to_string(state)?;
    let changes = conn.execute(
        "UPDATE job_state SET payload = ?1, updated_at = ?2 WHERE id = 1 AND session_id = ?3",
        params![payload, Utc::now().to_rfc3339(), state.session_id],
    )?;
    Ok(changes == 1)
}

pub fn delete_if_owned(conn: &Connection, session_id: &str) -> Result<bool> {
    let changes = conn.execute(
        "DELETE FROM job_state WHERE id = 1 AND session_id = ?1",
        params![session_id],
    )?;
    Ok(changes == 1)
}

pub fn delete(conn: &Connection) -> Result<bool> {
    let changes = conn.execute("DELETE FROM job_state WHERE id = 1", [])?;
    Ok(changes == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::executor::cursor::KeyValue;
    use tempfile::TempDir;

    fn sample(session: &str) -> JobState {
        JobState::new(
            JobType::Full,
            session,
            vec!["posts".into(), "users".into()],
            PathBuf::from("/backups/run"),
        )
    }

    #[test]
    fn test_step_sequence() {
        assert_eq!(Step::Db.next(JobType::Full), Step::FileScan);
        assert_eq!(Step::FileScan.next(JobType::Incremental), Step::Archive);
        assert_eq!(Step::Archive.next(JobType::Full), Step::Finish);
        assert_eq!(Step::Db.next(JobType::DbOnly), Step::Finish);
    }

    #[test]
    fn test_job_type_parse() {
        assert_eq!("db_only".parse::<JobType>().unwrap(), JobType::DbOnly);
        assert!("weekly".parse::<JobType>().is_err());
    }

    #[test]
    fn test_insert_load_and_single_instance() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();

        assert!(load(&conn).unwrap().is_none());

        let mut state = sample("s-1");
        state.cursor = Some(TableCursor::Key {
            column: "id".into(),
            last: Some(KeyValue::Integer(42)),
        });
        assert!(insert(&conn, &state).unwrap());
        assert!(!insert(&conn, &sample("s-2")).unwrap());

        let loaded = load(&conn).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_requires_same_session() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();

        let mut state = sample("s-1");
        insert(&conn, &state).unwrap();

        state.rows_exported = 10;
        assert!(save_if_owned(&conn, &state).unwrap());

        let mut stale = sample("s-old");
        stale.rows_exported = 99;
        assert!(!save_if_owned(&conn, &stale).unwrap());
        assert_eq!(load(&conn).unwrap().unwrap().rows_exported, 10);

        assert!(!delete_if_owned(&conn, "s-old").unwrap());
        assert!(delete_if_owned(&conn, "s-1").unwrap());
        assert!(!save_if_owned(&conn, &state).unwrap());
    }

    #[test]
    fn test_corrupt_payload_is_reported() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO job_state (id, session_id, payload, updated_at) VALUES (1, 's', '{not json', '')",
            [],
        )
        .unwrap();

        assert!(matches!(load(&conn), Err(EngineError::CorruptState(_))));
    }

    #[test]
    fn test_skip_stats_cap_reasons() {
        let mut stats = SkipStats::default();
        for i in 0..60 {
            stats.file(&format!("/f{i}"), "denied");
        }
        assert_eq!(stats.files, 60);
        assert_eq!(stats.reasons.len(), MAX_SKIP_REASONS);
    }
}
