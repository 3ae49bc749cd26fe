//! The relational store being backed up.
//!
//! The engine only needs a narrow view of it: table listing, primary key
//! discovery, paged reads ordered by key, and raw statement execution for
//! restore. [`SqliteSource`] implements it over a rusqlite pool.

pub mod sqlite;

pub use sqlite::SqliteSource;

use crate::executor::cursor::KeyValue;
use crate::utils::errors::Result;
use rusqlite::types::ValueRef;

/// One column value as read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// TEXT whose bytes are not valid UTF-8, kept verbatim
    RawText(Vec<u8>),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Render as a literal usable inside an INSERT statement.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(r) if r.is_finite() => format!("{r:?}"),
            SqlValue::Real(_) => "NULL".to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::RawText(b) => format!("CAST(X'{}' AS TEXT)", hex::encode(b)),
            SqlValue::Blob(b) => format!("X'{}'", hex::encode(b)),
        }
    }

    /// Key form of this value; NULL has none.
    pub fn to_key(&self) -> Option<KeyValue> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(i) => Some(KeyValue::Integer(*i)),
            SqlValue::Real(r) => Some(KeyValue::Real(*r)),
            SqlValue::Text(s) => Some(KeyValue::Text(s.clone())),
            SqlValue::RawText(b) => Some(KeyValue::RawText(b.clone())),
            SqlValue::Blob(b) => Some(KeyValue::Blob(b.clone())),
        }
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(r) => SqlValue::Real(r),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => SqlValue::Text(text.to_owned()),
                Err(_) => SqlValue::RawText(t.to_vec()),
            },
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// A page of rows with the column names they were selected under.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Where the next page of a table starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageRequest<'a> {
    /// Rows with `column > last`, ascending by `column`; from the start when `last` is None
    After {
        column: &'a str,
        last: Option<&'a KeyValue>,
    },
    /// Positional paging in primary key order (rowid when the table has no
    /// key), for tables without a single-column key
    Offset(u64),
}

pub trait SourceDatabase: Send + Sync {
    /// User tables in a stable order
    fn list_tables(&self) -> Result<Vec<String>>;

    /// The single-column primary key of `table`, if it has one
    fn primary_key(&self, table: &str) -> Result<Option<String>>;

    /// Statement recreating `table`, terminated by `;`
    fn create_statement(&self, table: &str) -> Result<String>;

    fn fetch_page(&self, table: &str, page: &PageRequest<'_>, limit: usize) -> Result<RowBatch>;

    /// Run one or more statements, used by restore
    fn execute_batch(&self, sql: &str) -> Result<()>;
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(SqlValue::Null.to_sql_literal(), "NULL");
        assert_eq!(SqlValue::Integer(-7).to_sql_literal(), "-7");
        assert_eq!(SqlValue::Real(1.5).to_sql_literal(), "1.5");
        assert_eq!(SqlValue::Real(2.0).to_sql_literal(), "2.0");
        assert_eq!(SqlValue::Real(f64::NAN).to_sql_literal(), "NULL");
        assert_eq!(SqlValue::Text("it's".into()).to_sql_literal(), "'it''s'");
        assert_eq!(SqlValue::Text(String::new()).to_sql_literal(), "''");
        assert_eq!(SqlValue::Blob(vec![0xde, 0xad]).to_sql_literal(), "X'dead'");
        assert_eq!(
            SqlValue::RawText(b"caf\xe9".to_vec()).to_sql_literal(),
            "CAST(X'636166e9' AS TEXT)"
        );
    }

    #[test]
    fn test_invalid_utf8_text_is_kept_verbatim() {
        let value = SqlValue::from(ValueRef::Text(b"caf\xe9"));
        assert_eq!(value, SqlValue::RawText(b"caf\xe9".to_vec()));
        assert_eq!(SqlValue::from(ValueRef::Text(b"cafe")), SqlValue::Text("cafe".into()));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
