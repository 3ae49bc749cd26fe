use crate::db::connection::DbPool;
use crate::utils::errors::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_state (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  session_id TEXT NOT NULL,
  payload TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS progress_snapshot (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  percent INTEGER NOT NULL,
  message TEXT NOT NULL,
  active INTEGER NOT NULL,
  session_id TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS execution_locks (
  name TEXT PRIMARY KEY,
  token TEXT NOT NULL,
  expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_records (
  id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  job_type TEXT NOT NULL CHECK(job_type IN ('full','incremental','db_only')),
  storage_location TEXT NOT NULL DEFAULT 'local',
  output_path TEXT NOT NULL,
  size_bytes INTEGER NOT NULL DEFAULT 0,
  status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','completed','failed')),
  locked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS file_checksums (
  backup_id TEXT NOT NULL REFERENCES backup_records(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  size INTEGER NOT NULL,
  modified INTEGER NOT NULL,
  PRIMARY KEY (backup_id, path)
);

CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_backup_records_created_at ON backup_records(created_at DESC);
"#;

pub fn migrate(pool: &DbPool) -> Result<()> {
    tracing::info!("[DB] Applying state schema");
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
