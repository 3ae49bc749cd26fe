//! ARCHIVE stage: pack the selected files into tar chunks.

use super::chunk::{ArchiveChunkWriter, ChunkSeries};
use super::{Deadline, StageContext, StageOutcome};
use crate::models::job_state::JobState;
use crate::utils::errors::Result;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Archive files from `file_offset` on, stopping at the per-call cap or when
/// the batch runs out of time.
pub(crate) fn archive_files(
    ctx: &StageContext<'_>,
    state: &mut JobState,
    deadline: &Deadline,
) -> Result<StageOutcome> {
    let total = state.file_list.len();
    let start = state.file_offset;
    if start >= total {
        return Ok(StageOutcome::Done);
    }
    let end = (start + ctx.config.limits.files_per_call).min(total);

    let series = ChunkSeries::archive(&state.work_dir);
    let mut writer = match ArchiveChunkWriter::open(
        series,
        state.archive_chunk_index,
        state.archive_chunk_bytes,
        ctx.config.limits.archive_chunk_bytes,
    ) {
        Ok(writer) => writer,
        Err(e) => {
            let index = state.archive_chunk_index;
            skip_chunk(state, index, end, e);
            return Ok(outcome(state));
        }
    };

    let root = &ctx.config.paths.content_root;
    let mut position = start;
    let mut archived = 0u64;
    while position < end {
        let path = &state.file_list[position];
        position += 1;

        match entry_name(root, path) {
            Some(name) => match writer.append_file(path, name) {
                Ok(()) => archived += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} vanished before archiving", path.display());
                }
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    state.skipped.file(&path.to_string_lossy(), e);
                }
            },
            None => {
                warn!("Skipping {}: outside the content root", path.display());
                state.skipped.file(&path.to_string_lossy(), "outside the content root");
            }
        }

        if deadline.expired() {
            break;
        }
    }

    let index = writer.index();
    match writer.finish() {
        Ok((index, bytes)) => {
            state.archive_chunk_index = index;
            state.archive_chunk_bytes = bytes;
            state.file_offset = position;
            state.files_archived += archived;
        }
        Err(e) => skip_chunk(state, index, position, e),
    }

    Ok(outcome(state))
}

/// Give up on the chunk being written and the files of this call; later
/// files go to a fresh chunk.
fn skip_chunk(state: &mut JobState, index: u32, end: usize, reason: io::Error) {
    let files = (end - state.file_offset) as u64;
    warn!("Skipping archive chunk {index} ({files} files): {reason}");
    state.skipped.chunk(files, reason);
    state.file_offset = end;
    state.archive_chunk_index = index + 1;
    state.archive_chunk_bytes = 0;
}

fn outcome(state: &JobState) -> StageOutcome {
    if state.file_offset >= state.file_list.len() {
        StageOutcome::Done
    } else {
        StageOutcome::Continue
    }
}

fn entry_name<'a>(root: &Path, path: &'a Path) -> Option<&'a Path> {
    path.strip_prefix(root)
        .ok()
        .filter(|name| !name.as_os_str().is_empty())
}
