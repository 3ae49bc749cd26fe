//! Per-table pagination state.
//!
//! Keyed tables resume strictly after the last exported key, so a restarted
//! batch never repeats or skips a row. Tables without a single-column primary
//! key fall back to positional offsets in key order, or rowid order when
//! there is no key at all. That degraded mode is only exact while no rows
//! are inserted or deleted during the export.

use crate::source::{PageRequest, RowBatch, SourceDatabase};
use crate::utils::errors::Result;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Last-seen primary key value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyValue {
    Integer(i64),
    Real(f64),
    Text(String),
    RawText(Vec<u8>),
    Blob(Vec<u8>),
}

impl ToSql for KeyValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            KeyValue::Integer(i) => i.to_sql(),
            KeyValue::Real(r) => r.to_sql(),
            KeyValue::Text(s) => s.to_sql(),
            KeyValue::RawText(b) => Ok(ToSqlOutput::Borrowed(ValueRef::Text(b))),
            KeyValue::Blob(b) => b.to_sql(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TableCursor {
    Key {
        column: String,
        last: Option<KeyValue>,
    },
    Offset {
        rows: u64,
    },
}

impl TableCursor {
    /// Cursor for the first visit of `table`.
    pub fn resolve(source: &dyn SourceDatabase, table: &str) -> Result<Self> {
        Ok(match source.primary_key(table)? {
            Some(column) => TableCursor::Key { column, last: None },
            None => TableCursor::Offset { rows: 0 },
        })
    }

    pub fn page(&self) -> PageRequest<'_> {
        match self {
            TableCursor::Key { column, last } => PageRequest::After {
                column,
                last: last.as_ref(),
            },
            TableCursor::Offset { rows } => PageRequest::Offset(*rows),
        }
    }

    /// Move past `batch`. Returns false when the cursor cannot move, which
    /// happens only if the page's last key is NULL.
    pub fn advance(&mut self, batch: &RowBatch) -> bool {
        match self {
            TableCursor::Key { column, last } => {
                let key = batch
                    .column_index(column)
                    .and_then(|i| batch.rows.last().and_then(|row| row.get(i)))
                    .and_then(|value| value.to_key());
                match key {
                    Some(key) => {
                        *last = Some(key);
                        true
                    }
                    None => false,
                }
            }
            TableCursor::Offset { rows } => {
                *rows += batch.len() as u64;
                true
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, TableCursor::Offset { .. })
    }
}
