//! FINISH: turn the run's output directory into a catalogued backup.
//!
//! Safe to run again after a crash: the record id comes from the job state,
//! so a repeated finalization finds its record instead of creating a second.

use super::chunk::ChunkSeries;
use super::file_scan::read_snapshot;
use super::manifest::BackupManifest;
use super::progress::ProgressReporter;
use super::StageContext;
use crate::models::backup_record::{self, BackupStatus, NewBackupRecord};
use crate::models::file_checksum;
use crate::models::job_state::{JobState, JobType};
use crate::models::settings::EngineSettings;
use crate::retention;
use crate::sync::BackupCompleted;
use crate::utils::errors::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::{fs, thread};
use tracing::{debug, info, warn};

pub(crate) fn finalize(
    ctx: &StageContext<'_>,
    state: &JobState,
    reporter: &mut ProgressReporter,
) -> Result<String> {
    reporter.report(95, "Finalizing backup", true);
    let work_dir = &state.work_dir;
    let id = state.backup_id.clone();

    let sql_chunks = list_chunks(ChunkSeries::sql(work_dir));
    let archive_chunks = if state.job_type.includes_files() {
        list_chunks(ChunkSeries::archive(work_dir))
    } else {
        Vec::new()
    };
    let total_bytes: u64 = sql_chunks
        .iter()
        .chain(&archive_chunks)
        .filter_map(|chunk| fs::metadata(chunk).ok())
        .map(|m| m.len())
        .sum();

    let manifest = BackupManifest::from_state(state, &sql_chunks, &archive_chunks, total_bytes);
    if let Err(e) = manifest.write(work_dir) {
        warn!("Failed to write manifest for {id}: {e}");
    }

    let mut conn = ctx.pool.get()?;
    let settings = EngineSettings::load(&conn, &ctx.config.retention)?;

    if backup_record::find_by_id(&conn, &id)?.is_none() {
        backup_record::create(
            &conn,
            &NewBackupRecord {
                id: id.clone(),
                created_at: Utc::now(),
                job_type: state.job_type,
                storage_location: "local".to_string(),
                output_path: work_dir.to_string_lossy().into_owned(),
                size_bytes: total_bytes as i64,
                status: BackupStatus::Completed,
            },
        )?;
    } else {
        info!("Backup {id} already recorded, resuming finalization");
    }

    if state.job_type.includes_files() {
        match read_snapshot(work_dir) {
            Ok(snapshot) => {
                let stored = file_checksum::store_for_backup(&mut conn, &id, &snapshot)?;
                debug!("Stored {stored} file stamps for {id}");
            }
            Err(e) => warn!(
                "No file snapshot for {id} ({e}); the next incremental run will include every file"
            ),
        }
    }

    if state.job_type == JobType::Incremental && settings.incremental_enabled {
        if let Some(full) = backup_record::find_latest_completed(&conn, &[JobType::Full])? {
            if !full.locked {
                backup_record::set_locked(&conn, &full.id, true)?;
                info!("Locked full backup {} as incremental baseline", full.id);
            }
        }
    }
    drop(conn);

    if let Some(cloud) = ctx.cloud {
        let cloud = Arc::clone(cloud);
        let event = BackupCompleted {
            backup_id: id.clone(),
            output_dir: work_dir.clone(),
            job_type: state.job_type,
        };
        thread::spawn(move || {
            if let Err(e) = cloud.backup_completed(&event) {
                warn!("Cloud sync of {} failed: {e:#}", event.backup_id);
            }
        });
    }

    // The backup just recorded always survives its own pruning pass
    let keep = settings.retention_count.max(1);
    match retention::prune_backups(ctx.pool, &ctx.config.paths.backup_root, keep) {
        Ok(summary) if !summary.removed.is_empty() => {
            info!("Retention removed {} backup(s)", summary.removed.len())
        }
        Ok(_) => {}
        Err(e) => warn!("Retention pruning failed: {e}"),
    }

    if !state.skipped.is_empty() {
        warn!(
            "Backup {id} completed with skips: {} tables, {} chunks, {} files",
            state.skipped.tables, state.skipped.chunks, state.skipped.files
        );
    }
    info!(
        "Backup {id} completed: {} rows, {} files, {total_bytes} bytes",
        state.rows_exported, state.files_archived
    );
    Ok(id)
}

fn list_chunks(series: ChunkSeries) -> Vec<PathBuf> {
    series.list().unwrap_or_else(|e| {
        warn!("Failed to list chunks: {e}");
        Vec::new()
    })
}
