pub mod backup_record;
pub mod file_checksum;
pub mod job_state;
pub mod progress;
pub mod settings;
