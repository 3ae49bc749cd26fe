use crate::config::RetentionConfig;
use crate::utils::errors::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

pub const RETENTION_COUNT: &str = "retention_count";
pub const INCREMENTAL_ENABLED: &str = "incremental_enabled";

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM settings WHERE key = ?", params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_all(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut map = HashMap::new();
    for r in rows {
        let (k, v) = r?;
        map.insert(k, v);
    }
    Ok(map)
}

/// Retention settings in effect: stored overrides on top of the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineSettings {
    pub retention_count: usize,
    pub incremental_enabled: bool,
}

impl EngineSettings {
    pub fn load(conn: &Connection, defaults: &RetentionConfig) -> Result<Self> {
        let all = get_all(conn)?;

        let retention_count = match all.get(RETENTION_COUNT) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Ignoring non-numeric {RETENTION_COUNT} setting '{raw}'");
                defaults.keep
            }),
            None => defaults.keep,
        };

        let incremental_enabled = match all.get(INCREMENTAL_ENABLED).map(|v| v.trim()) {
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            _ => defaults.incremental_enabled,
        };

        Ok(Self {
            retention_count,
            incremental_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_fall_back_to_config() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let conn = pool.get().unwrap();
        let defaults = RetentionConfig::default();

        let s = EngineSettings::load(&conn, &defaults).unwrap();
        assert_eq!(s.retention_count, defaults.keep);
        assert!(s.incremental_enabled);

        set(&conn, RETENTION_COUNT, "2").unwrap();
        set(&conn, INCREMENTAL_ENABLED, "false").unwrap();
        let s = EngineSettings::load(&conn, &defaults).unwrap();
        assert_eq!(s.retention_count, 2);
        assert!(!s.incremental_enabled);

        set(&conn, RETENTION_COUNT, "many").unwrap();
        assert_eq!(EngineSettings::load(&conn, &defaults).unwrap().retention_count, defaults.keep);
        assert_eq!(get(&conn, RETENTION_COUNT).unwrap().as_deref(), Some("many"));
    }
}
