//! Retention pruning and explicit deletion of catalogued backups.

use crate::db::connection::DbPool;
use crate::models::backup_record::{self, BackupRecord};
use crate::utils::errors::{EngineError, Result};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PruneSummary {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Delete completed, unlocked backups beyond the newest `keep`, oldest first.
/// A backup whose directory cannot be removed keeps its record and is retried
/// on the next pass.
pub fn prune_backups(pool: &DbPool, backup_root: &Path, keep: usize) -> Result<PruneSummary> {
    let conn = pool.get()?;
    let mut summary = PruneSummary::default();

    for record in backup_record::find_beyond_retention(&conn, keep)?.iter().rev() {
        if let Err(e) = remove_output_dir(backup_root, &record.output_path) {
            warn!("Failed to prune backup {}: {e}", record.id);
            summary.failed.push(record.id.clone());
            continue;
        }
        backup_record::delete(&conn, &record.id)?;
        info!("Pruned backup {} ({})", record.id, record.created_at);
        summary.removed.push(record.id.clone());
    }

    Ok(summary)
}

/// Remove a backup's directory, checksums and record.
pub fn delete_backup(pool: &DbPool, backup_root: &Path, id: &str) -> Result<BackupRecord> {
    let conn = pool.get()?;
    let record = backup_record::find_by_id(&conn, id)?
        .ok_or_else(|| EngineError::NotFound(format!("backup {id}")))?;

    remove_output_dir(backup_root, &record.output_path)?;
    backup_record::delete(&conn, id)?;
    info!("Deleted backup {id}");
    Ok(record)
}

fn remove_output_dir(backup_root: &Path, output_path: &str) -> Result<()> {
    let dir = Path::new(output_path);
    if dir == backup_root || !dir.starts_with(backup_root) {
        return Err(EngineError::InvalidInput(format!(
            "refusing to remove {output_path}: not inside {}",
            backup_root.display()
        )));
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
