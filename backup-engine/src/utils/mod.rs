//! Error types and logging setup.

pub mod errors;
pub mod logger;

pub use errors::{EngineError, RestoreFailure, Result};
