//! Restore a catalogued backup: extract archive chunks, replay SQL chunks.
//!
//! Neither half stops at the first problem. Every failed entry and statement
//! is collected and reported together once both halves have run.

use crate::db::connection::DbPool;
use crate::executor::chunk::ChunkSeries;
use crate::models::backup_record::{self, BackupRecord};
use crate::source::SourceDatabase;
use crate::utils::errors::{EngineError, RestoreFailure, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    #[serde(default = "default_true")]
    pub files: bool,

    #[serde(default = "default_true")]
    pub database: bool,

    /// Extract here instead of the content root
    #[serde(default)]
    pub target_dir: Option<PathBuf>,

    /// Restore only entries equal to or under these archive paths
    #[serde(default)]
    pub only_paths: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            files: true,
            database: true,
            target_dir: None,
            only_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub backup_id: String,
    pub files_restored: usize,
    pub statements_executed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveEntry {
    pub chunk: String,
    pub path: String,
    pub size: u64,
}

fn find_record(pool: &DbPool, id: &str) -> Result<BackupRecord> {
    let conn = pool.get()?;
    backup_record::find_by_id(&conn, id)?.ok_or_else(|| EngineError::NotFound(format!("backup {id}")))
}

pub fn restore_backup(
    pool: &DbPool,
    source: &dyn SourceDatabase,
    content_root: &Path,
    id: &str,
    options: &RestoreOptions,
) -> Result<RestoreReport> {
    let record = find_record(pool, id)?;
    let output_dir = PathBuf::from(&record.output_path);
    let mut outcome = RestoreFailure::default();

    if options.files && record.job_type.includes_files() {
        let target = options.target_dir.as_deref().unwrap_or(content_root);
        extract_files(&output_dir, target, &options.only_paths, &mut outcome);
    }
    if options.database {
        replay_sql(&output_dir, source, &mut outcome);
    }

    info!(
        "Restore of {id}: {} files, {} statements, {} errors",
        outcome.files_restored,
        outcome.statements_executed,
        outcome.file_errors.len() + outcome.database_errors.len()
    );

    if !outcome.is_empty() {
        return Err(EngineError::Restore(outcome));
    }
    Ok(RestoreReport {
        backup_id: record.id,
        files_restored: outcome.files_restored,
        statements_executed: outcome.statements_executed,
    })
}

fn selected(name: &Path, only_paths: &[String]) -> bool {
    only_paths.is_empty() || only_paths.iter().any(|p| name.starts_with(p.trim_start_matches('/')))
}

fn extract_files(output_dir: &Path, target: &Path, only_paths: &[String], outcome: &mut RestoreFailure) {
    let chunks = match ChunkSeries::archive(output_dir).list() {
        Ok(chunks) => chunks,
        Err(e) => {
            outcome.file_errors.push(format!("listing archive chunks: {e}"));
            return;
        }
    };
    if let Err(e) = fs::create_dir_all(target) {
        outcome.file_errors.push(format!("creating {}: {e}", target.display()));
        return;
    }

    for chunk in chunks {
        let label = chunk.display().to_string();
        let file = match File::open(&chunk) {
            Ok(file) => file,
            Err(e) => {
                outcome.file_errors.push(format!("{label}: {e}"));
                continue;
            }
        };
        let mut archive = tar::Archive::new(file);
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(e) => {
                outcome.file_errors.push(format!("{label}: {e}"));
                continue;
            }
        };

        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // A damaged stream cannot be resynchronised
                    outcome.file_errors.push(format!("{label}: {e}"));
                    break;
                }
            };
            let name = match entry.path() {
                Ok(name) => name.into_owned(),
                Err(e) => {
                    outcome.file_errors.push(format!("{label}: {e}"));
                    continue;
                }
            };
            if !selected(&name, only_paths) {
                continue;
            }
            match entry.unpack_in(target) {
                Ok(true) => outcome.files_restored += 1,
                Ok(false) => outcome
                    .file_errors
                    .push(format!("{}: refused path outside target", name.display())),
                Err(e) => outcome.file_errors.push(format!("{}: {e}", name.display())),
            }
        }
    }
}

fn replay_sql(output_dir: &Path, source: &dyn SourceDatabase, outcome: &mut RestoreFailure) {
    let chunks = match ChunkSeries::sql(output_dir).list() {
        Ok(chunks) => chunks,
        Err(e) => {
            outcome.database_errors.push(format!("listing SQL chunks: {e}"));
            return;
        }
    };

    for chunk in chunks {
        let sql = match fs::read_to_string(&chunk) {
            Ok(sql) => sql,
            Err(e) => {
                outcome.database_errors.push(format!("{}: {e}", chunk.display()));
                continue;
            }
        };
        for statement in split_statements(&sql) {
            match source.execute_batch(&statement) {
                Ok(()) => outcome.statements_executed += 1,
                Err(e) => {
                    warn!("Restore statement failed: {e}");
                    outcome.database_errors.push(format!("{}: {e}", preview(&statement)));
                }
            }
        }
    }
}

fn preview(statement: &str) -> String {
    const MAX: usize = 80;
    match statement.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => statement.to_string(),
    }
}

/// Split a dump into statements on `;` outside quotes, dropping `--` comments.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    // A doubled quote is an escaped quote, not the end
                    if chars.peek() == Some(&q) {
                        current.push(q);
                        chars.next();
                    } else {
                        quote = None;
                    }
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            current.push('\n');
                            break;
                        }
                    }
                }
                ';' => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Every archive entry of a backup, chunk by chunk.
pub fn list_archive_entries(pool: &DbPool, id: &str) -> Result<Vec<ArchiveEntry>> {
    let record = find_record(pool, id)?;
    let output_dir = PathBuf::from(&record.output_path);
    let mut listed = Vec::new();

    for chunk in ChunkSeries::archive(&output_dir).list()? {
        let chunk_name = chunk
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut archive = tar::Archive::new(File::open(&chunk)?);
        for entry in archive.entries()? {
            let entry = entry?;
            listed.push(ArchiveEntry {
                chunk: chunk_name.clone(),
                path: entry.path()?.to_string_lossy().replace('\\', "/"),
                size: entry.size(),
            });
        }
    }
    Ok(listed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes_and_comments() {
        let sql = "-- Table: \"t\"\nDROP TABLE IF EXISTS \"t\";\n\
                   INSERT INTO \"t\" VALUES (1, 'a;b', 'it''s -- not a comment');\n\
                   INSERT INTO \"t\" VALUES (2, NULL, 'line\none');\n";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "DROP TABLE IF EXISTS \"t\"");
        assert_eq!(
            statements[1],
            "INSERT INTO \"t\" VALUES (1, 'a;b', 'it''s -- not a comment')"
        );
        assert!(statements[2].contains("'line\none'"));
    }

    #[test]
    fn test_path_selection() {
        let only = vec!["uploads".to_string(), "/themes/site".to_string()];
        assert!(selected(Path::new("uploads/a.jpg"), &only));
        assert!(selected(Path::new("themes/site/style.css"), &only));
        assert!(!selected(Path::new("uploadsX/a.jpg"), &only));
        assert!(!selected(Path::new("plugins/p.php"), &only));
        assert!(selected(Path::new("anything"), &[]));
    }
}
