use crate::models::job_state::JobType;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

impl FromStr for BackupStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(EngineError::InvalidInput(format!("unknown backup status '{other}'"))),
        }
    }
}

impl ToSql for BackupStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for BackupStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: EngineError| FromSqlError::Other(e.to_string().into()))
    }
}

// ── BackupRecord ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub created_at: String,
    pub job_type: JobType,
    pub storage_location: String,
    pub output_path: String,
    pub size_bytes: i64,
    pub status: BackupStatus,
    /// Exempt from retention pruning; set on a full backup that incrementals build on
    pub locked: bool,
}

pub struct NewBackupRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub job_type: JobType,
    pub storage_location: String,
    pub output_path: String,
    pub size_bytes: i64,
    pub status: BackupStatus,
}

fn row_to_record(row: &Row) -> rusqlite::Result<BackupRecord> {
    Ok(BackupRecord {
        id: row.get("id")?,
        created_at: row.get("created_at")?,
        job_type: row.get("job_type")?,
        storage_location: row.get("storage_location")?,
        output_path: row.get("output_path")?,
        size_bytes: row.get("size_bytes")?,
        status: row.get("status")?,
        locked: row.get::<_, i64>("locked")? != 0,
    })
}

/// Newest first. Timestamps are fixed-width UTC so text order is time order.
pub fn find_all(conn: &Connection) -> Result<Vec<BackupRecord>> {
    let mut stmt =
        conn.prepare("SELECT * FROM backup_records ORDER BY created_at DESC, rowid DESC")?;
    let rows = stmt.query_map([], row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<BackupRecord>> {
    let record = conn
        .query_row(
            "SELECT * FROM backup_records WHERE id = ?",
            params![id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// Most recent completed backup of one of the given types.
pub fn find_latest_completed(conn: &Connection, types: &[JobType]) -> Result<Option<BackupRecord>> {
    Ok(find_all(conn)?
        .into_iter()
        .find(|r| r.status == BackupStatus::Completed && types.contains(&r.job_type)))
}

pub fn create(conn: &Connection, data: &NewBackupRecord) -> Result<BackupRecord> {
    conn.execute(
        "INSERT INTO backup_records (id, created_at, job_type, storage_location, output_path, size_bytes, status, locked)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            data.id,
            data.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            data.job_type,
            data.storage_location,
            data.output_path,
            data.size_bytes,
            data.status,
        ],
    )?;
    find_by_id(conn, &data.id)?
        .ok_or_else(|| EngineError::NotFound(format!("backup record {} after insert", data.id)))
}

pub fn set_locked(conn: &Connection, id: &str, locked: bool) -> Result<bool> {
    let changes = conn.execute(
        "UPDATE backup_records SET locked = ? WHERE id = ?",
        params![locked as i64, id],
    )?;
    Ok(changes > 0)
}

/// Completed, unlocked records beyond the newest `keep`, oldest last.
pub fn find_beyond_retention(conn: &Connection, keep: usize) -> Result<Vec<BackupRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM backup_records WHERE status = 'completed' AND locked = 0
         ORDER BY created_at DESC, rowid DESC LIMIT -1 OFFSET ?",
    )?;
    let rows = stmt.query_map(params![keep as i64], row_to_record)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let changes = conn.execute("DELETE FROM backup_records WHERE id = ?", params![id])?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn record(id: &str, job_type: JobType, minutes: i64) -> NewBackupRecord {
        NewBackupRecord {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
            job_type,
            storage_location: "local".to_string(),
            output_path: format!("/backups/{id}"),
            size_bytes: 10,
            status: BackupStatus::Completed,
        }
    }

    #[test]
    fn test_create_and_find() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();

        let created = create(&conn, &record("a", JobType::DbOnly, 0)).unwrap();
        assert_eq!(created.job_type, JobType::DbOnly);
        assert_eq!(created.status, BackupStatus::Completed);
        assert!(!created.locked);
        assert!(find_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_latest_completed_by_type() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();

        create(&conn, &record("full-1", JobType::Full, 0)).unwrap();
        create(&conn, &record("inc-1", JobType::Incremental, 10)).unwrap();
        create(&conn, &record("db-1", JobType::DbOnly, 20)).unwrap();
        let mut failed = record("full-2", JobType::Full, 30);
        failed.status = BackupStatus::Failed;
        create(&conn, &failed).unwrap();

        let latest = find_latest_completed(&conn, &[JobType::Full, JobType::Incremental])
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, "inc-1");

        let full = find_latest_completed(&conn, &[JobType::Full]).unwrap().unwrap();
        assert_eq!(full.id, "full-1");
    }

    #[test]
    fn test_beyond_retention_skips_locked() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();

        for (i, id) in ["t1", "t2", "t3", "t4"].iter().enumerate() {
            create(&conn, &record(id, JobType::Full, i as i64)).unwrap();
        }
        create(&conn, &record("t0", JobType::Full, -10)).unwrap();
        set_locked(&conn, "t0", true).unwrap();

        let ids: Vec<String> = find_beyond_retention(&conn, 2)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["t2".to_string(), "t1".to_string()]);
    }
}
