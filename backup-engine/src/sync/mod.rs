//! Cloud sync capability.
//!
//! The engine announces each completed backup through [`CloudSync`] and never
//! waits on the result. [`ProviderSync`] adapts any [`RemoteProvider`] (object
//! storage, another disk) into that hook: it uploads every file of the output
//! directory and then applies retention on the remote side.

pub mod local;

pub use local::LocalDirectoryProvider;

use crate::models::job_state::JobType;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Emitted once per completed backup.
#[derive(Debug, Clone, Serialize)]
pub struct BackupCompleted {
    pub backup_id: String,
    pub output_dir: PathBuf,
    pub job_type: JobType,
}

pub trait CloudSync: Send + Sync {
    fn backup_completed(&self, event: &BackupCompleted) -> anyhow::Result<()>;
}

/// A backup as stored by a remote provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteBackup {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

pub trait RemoteProvider: Send + Sync {
    /// Store the file at `path` under `name` (`{backup_id}/{relative path}`)
    fn upload_backup(&self, path: &Path, name: &str) -> anyhow::Result<()>;

    /// Stored backups, newest first
    fn list_backups(&self, limit: usize) -> anyhow::Result<Vec<RemoteBackup>>;

    fn delete_backup(&self, id: &str) -> anyhow::Result<()>;
}

pub struct ProviderSync<P> {
    provider: P,
    keep: usize,
}

impl<P: RemoteProvider> ProviderSync<P> {
    pub fn new(provider: P, keep: usize) -> Self {
        Self { provider, keep }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn upload(&self, event: &BackupCompleted) -> anyhow::Result<usize> {
        let mut uploaded = 0;
        for entry in WalkDir::new(&event.output_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&event.output_dir)?
                .to_string_lossy()
                .replace('\\', "/");
            let name = format!("{}/{}", event.backup_id, relative);
            self.provider
                .upload_backup(entry.path(), &name)
                .with_context(|| format!("uploading {name}"))?;
            uploaded += 1;
        }
        Ok(uploaded)
    }

    fn apply_retention(&self) -> anyhow::Result<()> {
        let remote = self.provider.list_backups(usize::MAX)?;
        for old in remote.iter().skip(self.keep) {
            match self.provider.delete_backup(&old.id) {
                Ok(()) => info!("Pruned remote backup {}", old.id),
                Err(e) => warn!("Failed to prune remote backup {}: {e:#}", old.id),
            }
        }
        Ok(())
    }
}

impl<P: RemoteProvider> CloudSync for ProviderSync<P> {
    fn backup_completed(&self, event: &BackupCompleted) -> anyhow::Result<()> {
        let uploaded = self.upload(event)?;
        info!("Synced backup {} ({uploaded} files)", event.backup_id);
        self.apply_retention()
            .context("remote retention")
    }
}
