//! Backup orchestrator - drives one backup run across many short batches.
//!
//! A run is a persisted [`JobState`] walking through DB -> FILE_SCAN ->
//! ARCHIVE -> FINISH. Each `run_batch` call:
//! - takes the execution lock, or reports `Locked` without touching anything
//! - reloads the job state under the lock
//! - runs stage work until the time budget is spent or the run finishes
//! - writes the state back (owner-checked), releases the lock
//! - schedules its own continuation when work remains

pub mod archive;
pub mod chunk;
pub mod continuation;
pub mod cursor;
mod db_export;
pub mod file_scan;
mod finalize;
pub mod lock;
pub mod manifest;
pub mod progress;


pub use continuation::{Continuation, NoContinuation};

use crate::config::Config;
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::backup_record::{self, BackupRecord};
use crate::models::job_state::{self, JobState, JobType, Step};
use crate::models::progress::{self as progress_model, ProgressSnapshot};
use crate::models::settings::{self, EngineSettings};
use crate::restore::{self, ArchiveEntry, RestoreOptions, RestoreReport};
use crate::retention;
use crate::source::{SourceDatabase, SqliteSource};
use crate::sync::CloudSync;
use crate::utils::errors::{EngineError, Result};
use chrono::Utc;
use lock::{ExecutionLock, BATCH_LOCK};
use progress::{stage_message, stage_percent, ProgressReporter};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartStatus {
    Accepted {
        session_id: String,
        job_type: JobType,
        work_dir: PathBuf,
    },
    /// The session already owns the running job
    Resumed { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Processing { percent: u8, message: String },
    Completed { backup_id: String },
    /// Another batch holds the lock; retry shortly
    Locked,
    NoActiveJob,
    /// The session's job no longer exists: finished elsewhere, cancelled or replaced
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancelStatus {
    Cancelled { session_id: String },
    NoActiveJob,
}

pub(crate) enum StageOutcome {
    /// Same step, more to do
    Continue,
    /// Step finished; move to the next one
    Done,
}

/// Wall-clock budget of one batch.
pub(crate) struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub(crate) fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }
}

pub(crate) struct StageContext<'a> {
    pub config: &'a Config,
    pub pool: &'a DbPool,
    pub source: &'a dyn SourceDatabase,
    pub cloud: Option<&'a Arc<dyn CloudSync>>,
}

pub struct BackupEngine {
    config: Config,
    pool: DbPool,
    source: Arc<dyn SourceDatabase>,
    continuation: Arc<dyn Continuation>,
    cloud: Option<Arc<dyn CloudSync>>,
}

impl BackupEngine {
    /// Engine over an existing state pool; applies the state schema.
    pub fn new(config: Config, pool: DbPool, source: Arc<dyn SourceDatabase>) -> Result<Self> {
        config.validate()?;
        migrate(&pool)?;
        Ok(Self {
            config,
            pool,
            source,
            continuation: Arc::new(NoContinuation),
            cloud: None,
        })
    }

    /// Engine over the state and source databases named in the config.
    pub fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.paths.state_database.parent() {
            fs::create_dir_all(parent)?;
        }
        let pool = create_pool(&config.paths.state_database)?;
        let source = SqliteSource::open(&config.paths.source_database)?;
        Self::new(config, pool, Arc::new(source))
    }

    pub fn with_continuation(mut self, continuation: Arc<dyn Continuation>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_cloud_sync(mut self, cloud: Arc<dyn CloudSync>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn lock(&self) -> ExecutionLock {
        ExecutionLock::new(self.pool.clone(), BATCH_LOCK, self.config.limits.lock_ttl())
    }

    // ── Job control ──

    /// Create a new run for `session_id`. The same session calling again gets
    /// `Resumed`; any other session is rejected while a run exists.
    pub fn start_backup(&self, job_type: JobType, session_id: &str) -> Result<StartStatus> {
        if session_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("session id must not be empty".into()));
        }

        let conn = self.pool.get()?;
        if let Some(existing) = job_state::load(&conn)? {
            return resume_or_reject(&existing.session_id, session_id);
        }

        let settings = EngineSettings::load(&conn, &self.config.retention)?;
        let job_type = if job_type == JobType::Incremental && !settings.incremental_enabled {
            info!("Incremental backups are disabled; running a full backup");
            JobType::Full
        } else {
            job_type
        };

        let tables = self.source.list_tables()?;
        let work_dir = self.config.paths.backup_root.join(format!(
            "{}-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            job_type,
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        fs::create_dir_all(&work_dir)?;

        let state = JobState::new(job_type, session_id, tables, work_dir.clone());
        if !job_state::insert(&conn, &state)? {
            // Lost a race with another start
            let _ = fs::remove_dir_all(&work_dir);
            let holder = job_state::load(&conn)?
                .map(|s| s.session_id)
                .unwrap_or_default();
            return resume_or_reject(&holder, session_id);
        }

        progress_model::reset(
            &conn,
            &ProgressSnapshot {
                percent: 0,
                message: "Backup started".to_string(),
                active: true,
                session_id: session_id.to_string(),
            },
        )?;

        info!(
            session_id = %session_id,
            "Started {job_type} backup: {} tables, output {}",
            state.tables.len(),
            work_dir.display()
        );
        Ok(StartStatus::Accepted {
            session_id: session_id.to_string(),
            job_type,
            work_dir,
        })
    }

    /// Run one time-budgeted batch of the active job.
    ///
    /// `session_id` identifies a resume request; `None` drives whatever job
    /// is active.
    pub fn run_batch(&self, session_id: Option<&str>) -> Result<BatchStatus> {
        {
            let conn = self.pool.get()?;
            match (job_state::load(&conn)?, session_id) {
                (None, Some(_)) => return Ok(BatchStatus::SessionExpired),
                (None, None) => return Ok(BatchStatus::NoActiveJob),
                (Some(state), Some(requested)) if state.session_id != requested => {
                    return Ok(BatchStatus::SessionExpired)
                }
                (Some(_), _) => {}
            }
        }

        let Some(guard) = self.lock().try_acquire()? else {
            debug!("Batch skipped: another batch holds the lock");
            return Ok(BatchStatus::Locked);
        };

        // Whatever the previous holder saved is now the state to continue from
        let state = {
            let conn = self.pool.get()?;
            job_state::load(&conn)?
        };
        let mut state = match (state, session_id) {
            (Some(state), Some(requested)) if state.session_id == requested => state,
            (Some(state), None) => state,
            (None, None) => {
                release(guard);
                return Ok(BatchStatus::NoActiveJob);
            }
            _ => {
                release(guard);
                return Ok(BatchStatus::SessionExpired);
            }
        };

        let status = self.drive(&mut state);
        release(guard);

        let status = status?;
        if let BatchStatus::Processing { .. } = status {
            self.continuation.schedule(&state.session_id);
        }
        Ok(status)
    }

    fn drive(&self, state: &mut JobState) -> Result<BatchStatus> {
        let deadline = Deadline::new(self.config.limits.time_budget());
        let mut reporter = ProgressReporter::new(
            self.pool.clone(),
            &state.session_id,
            self.config.limits.progress_interval(),
        );
        let ctx = StageContext {
            config: &self.config,
            pool: &self.pool,
            source: self.source.as_ref(),
            cloud: self.cloud.as_ref(),
        };

        loop {
            let step = state.step;
            let outcome = match step {
                Step::Finish => return self.finish(&ctx, state, &mut reporter),
                Step::Db => db_export::export_page(&ctx, state)?,
                Step::FileScan => file_scan::scan_files(&ctx, state)?,
                Step::Archive => archive::archive_files(&ctx, state, &deadline)?,
            };

            if let StageOutcome::Done = outcome {
                state.step = step.next(state.job_type);
                info!(session_id = %state.session_id, "Stage {step} complete, next {}", state.step);
            }
            reporter.report(stage_percent(state), &stage_message(state), state.step != step);

            if deadline.expired() {
                break;
            }
        }

        let conn = self.pool.get()?;
        if !job_state::save_if_owned(&conn, state)? {
            warn!(
                session_id = %state.session_id,
                "Job was cancelled or replaced during the batch; discarding its progress"
            );
            return Ok(BatchStatus::SessionExpired);
        }

        Ok(BatchStatus::Processing {
            percent: stage_percent(state),
            message: stage_message(state),
        })
    }

    fn finish(
        &self,
        ctx: &StageContext<'_>,
        state: &JobState,
        reporter: &mut ProgressReporter,
    ) -> Result<BatchStatus> {
        if !owns_job(&self.pool, &state.session_id)? {
            return Ok(BatchStatus::SessionExpired);
        }

        let backup_id = finalize::finalize(ctx, state, reporter)?;

        let conn = self.pool.get()?;
        job_state::delete_if_owned(&conn, &state.session_id)?;
        reporter.complete("Backup completed");
        Ok(BatchStatus::Completed { backup_id })
    }

    /// Stop the active job: its state, lock and output directory go away.
    /// A batch still running for it finds its state gone and discards its work.
    pub fn cancel_backup(&self) -> Result<CancelStatus> {
        let conn = self.pool.get()?;
        let state = match job_state::load(&conn) {
            Ok(state) => state,
            Err(EngineError::CorruptState(e)) => {
                warn!("Cancelling job with unreadable state: {e}");
                job_state::delete(&conn)?;
                self.lock().force_release()?;
                return Ok(CancelStatus::Cancelled {
                    session_id: String::new(),
                });
            }
            Err(e) => return Err(e),
        };
        let Some(state) = state else {
            return Ok(CancelStatus::NoActiveJob);
        };

        job_state::delete(&conn)?;
        self.lock().force_release()?;

        if state.work_dir.starts_with(&self.config.paths.backup_root)
            && state.work_dir != self.config.paths.backup_root
        {
            if let Err(e) = fs::remove_dir_all(&state.work_dir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {e}", state.work_dir.display());
                }
            }
        }

        progress_model::reset(
            &conn,
            &ProgressSnapshot {
                percent: 0,
                message: "Backup cancelled".to_string(),
                active: false,
                session_id: state.session_id.clone(),
            },
        )?;

        info!(session_id = %state.session_id, "Backup cancelled");
        Ok(CancelStatus::Cancelled {
            session_id: state.session_id,
        })
    }

    /// Latest snapshot; no lock, no side effects.
    pub fn progress(&self) -> Result<ProgressSnapshot> {
        let conn = self.pool.get()?;
        Ok(progress_model::load(&conn)?.unwrap_or_else(ProgressSnapshot::idle))
    }

    pub fn active_job(&self) -> Result<Option<JobState>> {
        let conn = self.pool.get()?;
        job_state::load(&conn)
    }

    // ── Catalog ──

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        let conn = self.pool.get()?;
        backup_record::find_all(&conn)
    }

    pub fn get_backup(&self, id: &str) -> Result<BackupRecord> {
        let conn = self.pool.get()?;
        backup_record::find_by_id(&conn, id)?
            .ok_or_else(|| EngineError::NotFound(format!("backup {id}")))
    }

    pub fn delete_backup(&self, id: &str) -> Result<BackupRecord> {
        retention::delete_backup(&self.pool, &self.config.paths.backup_root, id)
    }

    /// Refused while a backup runs: the dump being written would mix old and restored rows.
    pub fn restore_backup(&self, id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        if let Some(job) = self.active_job()? {
            return Err(EngineError::JobInProgress(job.session_id));
        }
        restore::restore_backup(
            &self.pool,
            self.source.as_ref(),
            &self.config.paths.content_root,
            id,
            options,
        )
    }

    pub fn list_archive_entries(&self, id: &str) -> Result<Vec<ArchiveEntry>> {
        restore::list_archive_entries(&self.pool, id)
    }

    // ── Settings ──

    pub fn settings(&self) -> Result<EngineSettings> {
        let conn = self.pool.get()?;
        EngineSettings::load(&conn, &self.config.retention)
    }

    pub fn update_settings(
        &self,
        retention_count: Option<usize>,
        incremental_enabled: Option<bool>,
    ) -> Result<EngineSettings> {
        let conn = self.pool.get()?;
        if let Some(count) = retention_count {
            settings::set(&conn, settings::RETENTION_COUNT, &count.to_string())?;
        }
        if let Some(enabled) = incremental_enabled {
            settings::set(&conn, settings::INCREMENTAL_ENABLED, &enabled.to_string())?;
        }
        EngineSettings::load(&conn, &self.config.retention)
    }
}

fn resume_or_reject(holder: &str, session_id: &str) -> Result<StartStatus> {
    if holder == session_id {
        Ok(StartStatus::Resumed {
            session_id: session_id.to_string(),
        })
    } else {
        Err(EngineError::JobInProgress(holder.to_string()))
    }
}

fn owns_job(pool: &DbPool, session_id: &str) -> Result<bool> {
    let conn = pool.get()?;
    Ok(job_state::load(&conn)?.is_some_and(|s| s.session_id == session_id))
}

fn release(guard: lock::LockGuard) {
    match guard.release() {
        Ok(true) => {}
        Ok(false) => warn!("Execution lock expired before release; batch overran its TTL"),
        Err(e) => warn!("Failed to release execution lock: {e}"),
    }
}
