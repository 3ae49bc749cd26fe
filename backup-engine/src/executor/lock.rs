//! TTL-bounded mutual exclusion between batch invocations.
//!
//! Acquisition is a single conditional upsert: it succeeds when no row exists
//! or the existing row has expired, so a crashed holder blocks others for at
//! most one TTL. Each holder carries a random token and only ever deletes its
//! own row.

use crate::db::connection::DbPool;
use crate::utils::errors::Result;
use chrono::Utc;
use rusqlite::params;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// The lock every batch takes; one backup of any kind runs at a time
pub const BATCH_LOCK: &str = "backup_batch";

pub struct ExecutionLock {
    pool: DbPool,
    name: String,
    ttl: Duration,
}

impl ExecutionLock {
    pub fn new(pool: DbPool, name: &str, ttl: Duration) -> Self {
        Self {
            pool,
            name: name.to_string(),
            ttl,
        }
    }

    /// Take the lock without waiting. `None` means another live holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(self.ttl.as_millis() as i64);

        let conn = self.pool.get()?;
        let changes = conn.execute(
            "INSERT INTO execution_locks (name, token, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET token = excluded.token, expires_at = excluded.expires_at
             WHERE execution_locks.expires_at <= ?4",
            params![self.name, token, expires_at, now],
        )?;

        if changes == 0 {
            return Ok(None);
        }
        Ok(Some(LockGuard {
            pool: self.pool.clone(),
            name: self.name.clone(),
            token,
            released: false,
        }))
    }

    /// Drop the lock whoever holds it. Used by cancellation.
    pub fn force_release(&self) -> Result<bool> {
        let conn = self.pool.get()?;
        let changes = conn.execute("DELETE FROM execution_locks WHERE name = ?", params![self.name])?;
        Ok(changes > 0)
    }
}

/// Held lock. Released explicitly, or on drop as a fallback.
pub struct LockGuard {
    pool: DbPool,
    name: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns false when the lock had already expired and been taken over.
    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        self.delete_own_row()
    }

    fn delete_own_row(&self) -> Result<bool> {
        let conn = self.pool.get()?;
        let changes = conn.execute(
            "DELETE FROM execution_locks WHERE name = ?1 AND token = ?2",
            params![self.name, self.token],
        )?;
        Ok(changes > 0)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.delete_own_row() {
            warn!("Failed to release lock {}: {e}", self.name);
        }
    }
}
