//! Throttled progress snapshots for external polling.

use crate::db::connection::DbPool;
use crate::models::job_state::{JobState, Step};
use crate::models::progress::{self, ProgressSnapshot};
use crate::utils::errors::EngineError;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DB_SPAN: (u8, u8) = (0, 40);
const FILE_SCAN_PERCENT: u8 = 45;
const ARCHIVE_SPAN: (u8, u8) = (50, 90);
const FINISH_PERCENT: u8 = 90;

pub struct ProgressReporter {
    pool: DbPool,
    session_id: String,
    interval: Duration,
    last_write: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(pool: DbPool, session_id: &str, interval: Duration) -> Self {
        Self {
            pool,
            session_id: session_id.to_string(),
            interval,
            last_write: None,
        }
    }

    /// Record progress for the owning session. Unforced writes closer together
    /// than the interval are dropped; completion is never throttled.
    pub fn report(&mut self, percent: u8, message: &str, force: bool) {
        let percent = percent.min(100);
        let due = self
            .last_write
            .map_or(true, |at| at.elapsed() >= self.interval);
        if !(force || percent >= 100 || due) {
            return;
        }

        let snapshot = ProgressSnapshot {
            percent,
            message: message.to_string(),
            active: percent < 100,
            session_id: self.session_id.clone(),
        };
        self.write(&snapshot);
    }

    /// Final inactive snapshot, written regardless of throttling.
    pub fn complete(&mut self, message: &str) {
        let snapshot = ProgressSnapshot {
            percent: 100,
            message: message.to_string(),
            active: false,
            session_id: self.session_id.clone(),
        };
        self.write(&snapshot);
    }

    fn write(&mut self, snapshot: &ProgressSnapshot) {
        let result = self
            .pool
            .get()
            .map_err(EngineError::from)
            .and_then(|conn| progress::write_guarded(&conn, snapshot));
        match result {
            Ok(true) => self.last_write = Some(Instant::now()),
            Ok(false) => debug!(
                "Discarded progress write {}% for finished session {}",
                snapshot.percent, self.session_id
            ),
            // Polling is informational; a failed write never fails the batch
            Err(e) => warn!("Failed to write progress: {e}"),
        }
    }
}

fn span(range: (u8, u8), done: usize, total: usize) -> u8 {
    if total == 0 {
        return range.1;
    }
    let width = u64::from(range.1 - range.0);
    let done = done.min(total) as u64;
    range.0 + (width * done / total as u64) as u8
}

/// Overall percent for the stage the job is in.
pub fn stage_percent(state: &JobState) -> u8 {
    match state.step {
        Step::Db => span(DB_SPAN, state.current_table_index, state.tables.len()),
        Step::FileScan => FILE_SCAN_PERCENT,
        Step::Archive => span(ARCHIVE_SPAN, state.file_offset, state.file_list.len()),
        Step::Finish => FINISH_PERCENT,
    }
}

pub fn stage_message(state: &JobState) -> String {
    match state.step {
        Step::Db => match state.current_table() {
            Some(table) => format!(
                "Exporting table {table} ({}/{}, {} rows so far)",
                state.current_table_index + 1,
                state.tables.len(),
                state.rows_exported
            ),
            None => "Database export complete".to_string(),
        },
        Step::FileScan => "Scanning files".to_string(),
        Step::Archive => format!(
            "Archiving files ({}/{})",
            state.file_offset,
            state.file_list.len()
        ),
        Step::Finish => "Finalizing backup".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::models::job_state::JobType;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_stage_percent_spans() {
        let mut state = JobState::new(
            JobType::Full,
            "s",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            PathBuf::from("/w"),
        );
        assert_eq!(stage_percent(&state), 0);
        state.current_table_index = 2;
        assert_eq!(stage_percent(&state), 20);

        state.step = Step::FileScan;
        assert_eq!(stage_percent(&state), 45);

        state.step = Step::Archive;
        state.file_list = (0..10).map(|i| PathBuf::from(format!("/f{i}"))).collect();
        state.file_offset = 5;
        assert_eq!(stage_percent(&state), 70);
        state.file_offset = 10;
        assert_eq!(stage_percent(&state), 90);

        state.file_list.clear();
        state.file_offset = 0;
        assert_eq!(stage_percent(&state), 90);
    }

    #[test]
    fn test_throttle_and_force() {
        let dir = TempDir::new().unwrap();
        let pool = test_pool(dir.path());
        let mut reporter = ProgressReporter::new(pool.clone(), "s", Duration::from_secs(3600));

        reporter.report(10, "first", false);
        reporter.report(20, "throttled", false);
        let conn = pool.get().unwrap();
        assert_eq!(progress::load(&conn).unwrap().unwrap().percent, 10);

        reporter.report(30, "forced", true);
        assert_eq!(progress::load(&conn).unwrap().unwrap().percent, 30);

        reporter.complete("done");
        let snap = progress::load(&conn).unwrap().unwrap();
        assert_eq!((snap.percent, snap.active), (100, false));

        // A straggler of the same session cannot regress it
        reporter.report(55, "zombie", true);
        assert_eq!(progress::load(&conn).unwrap().unwrap().percent, 100);
    }
}
