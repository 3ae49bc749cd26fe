use crate::fs::metadata::{ChecksumIndex, FileStamp};
use crate::utils::errors::Result;
use rusqlite::{params, Connection};

/// Size/mtime stamps recorded for every file of a completed backup.
pub fn load_for_backup(conn: &Connection, backup_id: &str) -> Result<ChecksumIndex> {
    let mut stmt =
        conn.prepare("SELECT path, size, modified FROM file_checksums WHERE backup_id = ?")?;
    let rows = stmt.query_map(params![backup_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            FileStamp {
                size: row.get::<_, i64>(1)?.max(0) as u64,
                modified: row.get(2)?,
            },
        ))
    })?;
    let mut index = ChecksumIndex::new();
    for r in rows {
        let (path, stamp) = r?;
        index.insert(path, stamp);
    }
    Ok(index)
}

pub fn store_for_backup(conn: &mut Connection, backup_id: &str, index: &ChecksumIndex) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO file_checksums (backup_id, path, size, modified) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (path, stamp) in index {
            stmt.execute(params![backup_id, path, stamp.size as i64, stamp.modified])?;
        }
    }
    tx.commit()?;
    Ok(index.len())
}

pub fn delete_for_backup(conn: &Connection, backup_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM file_checksums WHERE backup_id = ?", params![backup_id])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::backup_record::{self, BackupStatus, NewBackupRecord};
    use crate::models::job_state::JobType;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_store_load_and_cascade() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        backup_record::create(
            &conn,
            &NewBackupRecord {
                id: "b1".into(),
                created_at: Utc::now(),
                job_type: JobType::Full,
                storage_location: "local".into(),
                output_path: "/backups/b1".into(),
                size_bytes: 0,
                status: BackupStatus::Completed,
            },
        )
        .unwrap();

        let mut index = ChecksumIndex::new();
        index.insert("a.txt".into(), FileStamp { size: 3, modified: 100 });
        index.insert("dir/b.txt".into(), FileStamp { size: 7, modified: 200 });
        assert_eq!(store_for_backup(&mut conn, "b1", &index).unwrap(), 2);

        assert_eq!(load_for_backup(&conn, "b1").unwrap(), index);
        assert!(load_for_backup(&conn, "other").unwrap().is_empty());

        backup_record::delete(&conn, "b1").unwrap();
        assert!(load_for_backup(&conn, "b1").unwrap().is_empty());
    }
}
