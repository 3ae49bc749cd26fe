//! Backup manifest, serialized as `manifest.json` in each output directory.
//!
//! Describes what the run produced and what it had to give up on, so a
//! backup can be inspected without replaying it.

use crate::models::job_state::{JobState, JobType, SkipStats};
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: u32,
    pub backup_id: String,
    pub session_id: String,
    pub job_type: JobType,
    pub tables: Vec<String>,
    pub rows_exported: u64,
    /// Chunk file names relative to the output directory
    pub sql_chunks: Vec<String>,
    pub archive_chunks: Vec<String>,
    pub files_selected: usize,
    pub files_archived: u64,
    pub total_bytes: u64,
    pub skipped: SkipStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BackupManifest {
    pub fn from_state(
        state: &JobState,
        sql_chunks: &[PathBuf],
        archive_chunks: &[PathBuf],
        total_bytes: u64,
    ) -> Self {
        let relative = |chunks: &[PathBuf]| -> Vec<String> {
            chunks
                .iter()
                .map(|p| {
                    p.strip_prefix(&state.work_dir)
                        .unwrap_or(p)
                        .to_string_lossy()
                        .replace('\\', "/")
                })
                .collect()
        };

        Self {
            version: 1,
            backup_id: state.backup_id.clone(),
            session_id: state.session_id.clone(),
            job_type: state.job_type,
            tables: state.tables.clone(),
            rows_exported: state.rows_exported,
            sql_chunks: relative(sql_chunks),
            archive_chunks: relative(archive_chunks),
            files_selected: state.file_list.len(),
            files_archived: state.files_archived,
            total_bytes,
            skipped: state.skipped.clone(),
            started_at: state.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self> {
        let raw = std::fs::read(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
