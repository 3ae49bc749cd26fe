pub mod metadata;
pub mod walker;
