use crate::config::AppConfig;
use crate::services::continuation::ContinuationQueue;
use backup_engine::BackupEngine;
use std::sync::Arc;

pub struct AppState {
    pub engine: Arc<BackupEngine>,
    pub queue: Arc<ContinuationQueue>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(engine: Arc<BackupEngine>, queue: Arc<ContinuationQueue>, config: AppConfig) -> Self {
        Self {
            engine,
            queue,
            config,
        }
    }
}
