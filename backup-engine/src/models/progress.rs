use crate::utils::errors::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// What pollers see. Overwritten often, always read as a whole row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub message: String,
    pub active: bool,
    pub session_id: String,
}

impl ProgressSnapshot {
    pub fn idle() -> Self {
        Self {
            percent: 0,
            message: "Idle".to_string(),
            active: false,
            session_id: String::new(),
        }
    }
}

pub fn load(conn: &Connection) -> Result<Option<ProgressSnapshot>> {
    let snapshot = conn
        .query_row(
            "SELECT percent, message, active, session_id FROM progress_snapshot WHERE id = 1",
            [],
            |row| {
                Ok(ProgressSnapshot {
                    percent: row.get::<_, i64>(0)?.clamp(0, 100) as u8,
                    message: row.get(1)?,
                    active: row.get::<_, i64>(2)? != 0,
                    session_id: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(snapshot)
}

/// Write a snapshot unless it would regress a finished run of the same session.
///
/// A session that reached 100% cannot drop below it again, and a session that
/// went inactive cannot become active again. Any other session may overwrite.
/// The comparison happens inside the upsert so concurrent writers cannot
/// interleave between the read and the write. Returns whether the row changed.
pub fn write_guarded(conn: &Connection, snapshot: &ProgressSnapshot) -> Result<bool> {
    let changes = conn.execute(
        "INSERT INTO progress_snapshot (id, percent, message, active, session_id, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
           percent = excluded.percent,
           message = excluded.message,
           active = excluded.active,
           session_id = excluded.session_id,
           updated_at = excluded.updated_at
         WHERE NOT (
           progress_snapshot.session_id = excluded.session_id
           AND (
             (progress_snapshot.percent >= 100 AND excluded.percent < 100)
             OR (progress_snapshot.active = 0 AND excluded.active = 1)
           )
         )",
        params![
            i64::from(snapshot.percent.min(100)),
            snapshot.message,
            snapshot.active as i64,
            snapshot.session_id,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(changes == 1)
}

/// Unconditional write, used when a new run takes over the snapshot.
pub fn reset(conn: &Connection, snapshot: &ProgressSnapshot) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO progress_snapshot (id, percent, message, active, session_id, updated_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5)",
        params![
            i64::from(snapshot.percent.min(100)),
            snapshot.message,
            snapshot.active as i64,
            snapshot.session_id,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}
