//! FILE_SCAN stage: enumerate the content tree in a single pass.
//!
//! Incremental runs diff against the stamps of the latest completed full or
//! incremental backup. Every file seen lands in this run's snapshot, selected
//! or not, so the next incremental diffs against the whole tree.

use super::{StageContext, StageOutcome};
use crate::fs::metadata::{unchanged, ChecksumIndex};
use crate::fs::walker::{walk_directory_with_callback, WalkOptions};
use crate::models::backup_record;
use crate::models::file_checksum;
use crate::models::job_state::{JobState, JobType};
use crate::utils::errors::{EngineError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FILE_LIST_FILE: &str = "file-list.json";
pub const CHECKSUMS_FILE: &str = "checksums.json";

pub(crate) fn scan_files(ctx: &StageContext<'_>, state: &mut JobState) -> Result<StageOutcome> {
    let previous = match state.job_type {
        JobType::Incremental => load_baseline(ctx)?,
        _ => ChecksumIndex::new(),
    };

    let options = WalkOptions::from_scan_config(&ctx.config.scan, &ctx.config.paths.backup_root);
    let mut selected: Vec<PathBuf> = Vec::new();
    let mut snapshot = ChecksumIndex::new();
    let mut total_bytes = 0u64;
    let mut non_utf8: Vec<PathBuf> = Vec::new();

    let unreadable = walk_directory_with_callback(&ctx.config.paths.content_root, &options, |file| {
        // The job state and snapshot are JSON, which only holds UTF-8 paths
        let Some(key) = file.path.to_str().map(str::to_owned) else {
            non_utf8.push(file.path);
            return;
        };
        if !unchanged(&previous, &key, &file.stamp) {
            total_bytes += file.stamp.size;
            selected.push(file.path);
        }
        snapshot.insert(key, file.stamp);
    });
    state.skipped.unreadable(unreadable as u64);
    for path in &non_utf8 {
        warn!("Skipping {}: file name is not valid UTF-8", path.display());
        state.skipped.file(&path.to_string_lossy(), "file name is not valid UTF-8");
    }

    info!(
        "File scan: {} of {} files selected ({} bytes)",
        selected.len(),
        snapshot.len(),
        total_bytes
    );

    write_json(&state.work_dir, FILE_LIST_FILE, &selected);
    write_json(&state.work_dir, CHECKSUMS_FILE, &snapshot);

    state.file_list = selected;
    state.file_offset = 0;
    Ok(StageOutcome::Done)
}

fn load_baseline(ctx: &StageContext<'_>) -> Result<ChecksumIndex> {
    let conn = ctx.pool.get()?;
    match backup_record::find_latest_completed(&conn, &[JobType::Full, JobType::Incremental])? {
        Some(record) => {
            let index = file_checksum::load_for_backup(&conn, &record.id)?;
            info!("Incremental baseline {} ({} files)", record.id, index.len());
            Ok(index)
        }
        None => {
            info!("No completed baseline; incremental run includes every file");
            Ok(ChecksumIndex::new())
        }
    }
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) {
    let result = serde_json::to_vec(value)
        .map_err(EngineError::from)
        .and_then(|bytes| Ok(std::fs::write(dir.join(name), bytes)?));
    if let Err(e) = result {
        warn!("Failed to write {name}: {e}");
    }
}

/// Snapshot written by the scan of the run in `work_dir`.
pub fn read_snapshot(work_dir: &Path) -> Result<ChecksumIndex> {
    let raw = std::fs::read(work_dir.join(CHECKSUMS_FILE))?;
    Ok(serde_json::from_slice(&raw)?)
}
