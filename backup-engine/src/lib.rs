//! Backup Engine Library
//!
//! Resumable, chunked backups of a live relational database and file tree,
//! driven by short time-budgeted batches that persist their own progress.

pub mod config;
pub mod db;
pub mod executor;
pub mod fs;
pub mod models;
pub mod restore;
pub mod retention;
pub mod source;
pub mod sync;
pub mod utils;

pub use config::Config;
pub use executor::{BackupEngine, BatchStatus, CancelStatus, Continuation, StartStatus};
pub use models::backup_record::{BackupRecord, BackupStatus};
pub use models::job_state::{JobState, JobType, Step};
pub use models::progress::ProgressSnapshot;
pub use utils::errors::{EngineError, RestoreFailure};
pub type Result<T> = std::result::Result<T, EngineError>;
