//! Error types for the backup engine.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("A backup is already in progress (session {0})")]
    JobInProgress(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt job state: {0}")]
    CorruptState(String),

    #[error("Restore failed: {0}")]
    Restore(RestoreFailure),
}

/// Everything that went wrong during a restore, files and database together.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreFailure {
    pub files_restored: usize,
    pub statements_executed: usize,
    pub file_errors: Vec<String>,
    pub database_errors: Vec<String>,
}

impl RestoreFailure {
    pub fn is_empty(&self) -> bool {
        self.file_errors.is_empty() && self.database_errors.is_empty()
    }
}

impl fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file error(s), {} database error(s)",
            self.file_errors.len(),
            self.database_errors.len()
        )?;
        if let Some(first) = self.file_errors.first().or(self.database_errors.first()) {
            write!(f, "; first: {first}")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
