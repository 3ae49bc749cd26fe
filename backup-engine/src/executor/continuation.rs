/// Schedules another `run_batch` for a session that still has work left.
///
/// Implementations must return immediately; the batch that calls `schedule`
/// never waits for, or depends on, the continuation.
pub trait Continuation: Send + Sync {
    fn schedule(&self, session_id: &str);
}

/// No self-continuation: callers drive the job by polling `run_batch`.
pub struct NoContinuation;

impl Continuation for NoContinuation {
    fn schedule(&self, session_id: &str) {
        tracing::debug!("No continuation configured for session {session_id}");
    }
}
