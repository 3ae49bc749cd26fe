//! Work queue that keeps a backup moving between batches.
//!
//! The engine schedules the session after every batch that left work behind.
//! A single worker drains the queue and runs the next batch on the blocking
//! pool. A batch that finds the lock taken is retried with exponential
//! backoff until it gets through or the attempts run out.

use backup_engine::{BackupEngine, BatchStatus, Continuation};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ContinuationQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl Continuation for ContinuationQueue {
    fn schedule(&self, session_id: &str) {
        if self.tx.send(session_id.to_string()).is_err() {
            tracing::warn!("Continuation worker stopped; session {session_id} waits for a manual run");
        }
    }
}

pub fn channel() -> (ContinuationQueue, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ContinuationQueue { tx }, rx)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(5),
            attempts: 20,
        }
    }
}

pub fn start_worker(
    engine: Arc<BackupEngine>,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let session_id = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(session_id) => session_id,
                    None => break,
                },
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = continue_session(&engine, &session_id, policy) => {}
            }
        }
        tracing::info!("Continuation worker stopped");
    })
}

/// Run one batch for `session_id`, retrying while another batch holds the lock.
async fn continue_session(engine: &Arc<BackupEngine>, session_id: &str, policy: RetryPolicy) {
    let mut delay = policy.initial;

    for attempt in 1..=policy.attempts {
        let engine = engine.clone();
        let session = session_id.to_string();
        let result = tokio::task::spawn_blocking(move || engine.run_batch(Some(&session))).await;

        match result {
            Ok(Ok(BatchStatus::Locked)) => {
                tracing::debug!(session_id = %session_id, attempt, "Batch locked, retrying in {delay:?}");
            }
            Ok(Ok(BatchStatus::Processing { percent, .. })) => {
                // The batch queued its own follow-up
                tracing::debug!(session_id = %session_id, "Batch done at {percent}%");
                return;
            }
            Ok(Ok(BatchStatus::Completed { backup_id })) => {
                tracing::info!(session_id = %session_id, "Backup {backup_id} completed");
                return;
            }
            Ok(Ok(status)) => {
                tracing::info!(session_id = %session_id, "Dropping continuation: {status:?}");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, attempt, "Batch failed: {e}");
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, "Batch task panicked: {e}");
                return;
            }
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(policy.max);
    }

    tracing::warn!(
        session_id = %session_id,
        "Giving up after {} attempts; the job resumes on the next run request",
        policy.attempts
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_engine::source::{SourceDatabase, SqliteSource};
    use backup_engine::{Config, JobType};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, queue: ContinuationQueue) -> Arc<BackupEngine> {
        let mut config = Config::new(
            dir.path().join("site"),
            dir.path().join("backups"),
            dir.path().join("site.db"),
            dir.path().join("state.db"),
        );
        config.limits.time_budget_ms = 0;
        config.limits.batch_rows = 5;
        std::fs::create_dir_all(&config.paths.content_root).unwrap();
        std::fs::write(config.paths.content_root.join("index.html"), b"<h1>hi</h1>").unwrap();

        SqliteSource::open(&config.paths.source_database)
            .unwrap()
            .execute_batch(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY, title TEXT);
                 INSERT INTO posts (title) VALUES ('a'), ('b'), ('c'), ('d'), ('e'), ('f'), ('g');",
            )
            .unwrap();

        Arc::new(
            BackupEngine::open(config)
                .unwrap()
                .with_continuation(Arc::new(queue)),
        )
    }

    #[tokio::test]
    async fn test_worker_drives_backup_to_completion() {
        let dir = TempDir::new().unwrap();
        let (queue, rx) = channel();
        let kick = queue.tx.clone();
        let engine = engine(&dir, queue);
        let cancel = CancellationToken::new();
        let worker = start_worker(engine.clone(), rx, cancel.clone(), RetryPolicy::default());

        engine.start_backup(JobType::Full, "s-1").unwrap();
        kick.send("s-1".to_string()).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let progress = engine.progress().unwrap();
            if progress.percent == 100 && !progress.active {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "backup never completed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(engine.list_backups().unwrap().len(), 1);
        assert!(engine.active_job().unwrap().is_none());

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_session_is_dropped() {
        let dir = TempDir::new().unwrap();
        let (queue, rx) = channel();
        let kick = queue.tx.clone();
        let engine = engine(&dir, queue);
        let cancel = CancellationToken::new();
        let worker = start_worker(engine.clone(), rx, cancel.clone(), RetryPolicy::default());

        kick.send("nobody".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(engine.active_job().unwrap().is_none());
        assert!(engine.list_backups().unwrap().is_empty());
        cancel.cancel();
        worker.await.unwrap();
    }
}
