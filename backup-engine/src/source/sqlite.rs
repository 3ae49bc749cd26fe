use super::{quote_ident, PageRequest, RowBatch, SourceDatabase, SqlValue};
use crate::db::connection::DbPool;
use crate::utils::errors::{EngineError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, ToSql};
use std::path::Path;
use std::time::Duration;

/// SQLite database exported by the DB stage.
#[derive(Clone)]
pub struct SqliteSource {
    pool: DbPool,
}

impl SqliteSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open the live database as-is: no journal mode or other pragma changes.
    pub fn open(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder().max_size(2).build(manager)?;
        Ok(Self::new(pool))
    }
}

impl SourceDatabase for SqliteSource {
    fn list_tables(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn primary_key(&self, table: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let keys = key_columns(&conn, table)?;

        // Composite keys cannot be paged with a single `>` comparison
        Ok(match keys.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        })
    }

    fn create_statement(&self, table: &str) -> Result<String> {
        let conn = self.pool.get()?;
        let sql: Option<String> = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        let sql = sql.ok_or_else(|| EngineError::NotFound(format!("table {table}")))?;
        Ok(format!("{};", sql.trim_end().trim_end_matches(';')))
    }

    fn fetch_page(&self, name: &str, page: &PageRequest<'_>, limit: usize) -> Result<RowBatch> {
        let conn = self.pool.get()?;
        let table = quote_ident(name);
        let limit = limit as i64;
        let offset = match page {
            PageRequest::Offset(rows) => *rows as i64,
            PageRequest::After { .. } => 0,
        };

        let (sql, bound): (String, Vec<&dyn ToSql>) = match page {
            PageRequest::After { column, last: None } => (
                format!("SELECT * FROM {table} ORDER BY {} LIMIT ?1", quote_ident(column)),
                vec![&limit],
            ),
            PageRequest::After {
                column,
                last: Some(last),
            } => {
                let column = quote_ident(column);
                (
                    format!("SELECT * FROM {table} WHERE {column} > ?1 ORDER BY {column} LIMIT ?2"),
                    vec![*last as &dyn ToSql, &limit],
                )
            }
            PageRequest::Offset(_) => {
                // WITHOUT ROWID tables always have a key; only keyless tables need rowid
                let keys = key_columns(&conn, name)?;
                let order = if keys.is_empty() {
                    "rowid".to_string()
                } else {
                    keys.iter().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ")
                };
                (
                    format!("SELECT * FROM {table} ORDER BY {order} LIMIT ?1 OFFSET ?2"),
                    vec![&limit, &offset],
                )
            }
        };

        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query(bound.as_slice())?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(SqlValue::from(row.get_ref(i)?));
            }
            rows.push(values);
        }

        Ok(RowBatch { columns, rows })
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

/// Primary key columns of `table` in key order.
fn key_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let mut keys = stmt
        .query_map([], |row| Ok((row.get::<_, i64>("pk")?, row.get::<_, String>("name")?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(pk, _)| *pk > 0)
        .collect::<Vec<_>>();
    keys.sort_by_key(|(pk, _)| *pk);
    Ok(keys.into_iter().map(|(_, name)| name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::cursor::KeyValue;
    use tempfile::TempDir;

    fn seeded(dir: &TempDir) -> SqliteSource {
        let source = SqliteSource::open(&dir.path().join("site.db")).unwrap();
        source
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, bio TEXT);
                 CREATE TABLE tags (a TEXT, b TEXT, PRIMARY KEY (a, b));
                 CREATE TABLE log (line TEXT);
                 INSERT INTO users (id, name, bio) VALUES (1, 'ann', NULL), (2, 'bob', 'x'), (3, 'cy', 'y');
                 INSERT INTO log (line) VALUES ('one'), ('two'), ('three');",
            )
            .unwrap();
        source
    }

    #[test]
    fn test_tables_and_keys() {
        let dir = TempDir::new().unwrap();
        let source = seeded(&dir);

        assert_eq!(source.list_tables().unwrap(), vec!["log", "tags", "users"]);
        assert_eq!(source.primary_key("users").unwrap().as_deref(), Some("id"));
        assert_eq!(source.primary_key("tags").unwrap(), None);
        assert_eq!(source.primary_key("log").unwrap(), None);
        assert!(source.create_statement("users").unwrap().starts_with("CREATE TABLE users"));
        assert!(source.create_statement("users").unwrap().ends_with(';'));
    }

    #[test]
    fn test_keyed_pages() {
        let dir = TempDir::new().unwrap();
        let source = seeded(&dir);

        let first = source
            .fetch_page("users", &PageRequest::After { column: "id", last: None }, 2)
            .unwrap();
        assert_eq!(first.columns, vec!["id", "name", "bio"]);
        assert_eq!(first.len(), 2);
        assert_eq!(first.rows[0][2], SqlValue::Null);

        let last = KeyValue::Integer(2);
        let rest = source
            .fetch_page("users", &PageRequest::After { column: "id", last: Some(&last) }, 2)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest.rows[0][0], SqlValue::Integer(3));
    }

    #[test]
    fn test_offset_pages() {
        let dir = TempDir::new().unwrap();
        let source = seeded(&dir);

        let page = source.fetch_page("log", &PageRequest::Offset(1), 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.rows[0][0], SqlValue::Text("two".into()));
    }

    #[test]
    fn test_offset_pages_without_rowid_follow_key_order() {
        let dir = TempDir::new().unwrap();
        let source = seeded(&dir);
        source
            .execute_batch(
                "CREATE TABLE pairs (a TEXT, b TEXT, PRIMARY KEY (b, a)) WITHOUT ROWID;
                 INSERT INTO pairs (a, b) VALUES ('x', '2'), ('y', '1'), ('z', '1');",
            )
            .unwrap();

        assert_eq!(source.primary_key("pairs").unwrap(), None);
        let first = source.fetch_page("pairs", &PageRequest::Offset(0), 2).unwrap();
        let rest = source.fetch_page("pairs", &PageRequest::Offset(2), 2).unwrap();
        let seen: Vec<_> = first.rows.iter().chain(&rest.rows).map(|r| r[0].clone()).collect();
        assert_eq!(
            seen,
            vec![
                SqlValue::Text("y".into()),
                SqlValue::Text("z".into()),
                SqlValue::Text("x".into())
            ]
        );
    }
}
