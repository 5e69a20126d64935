// Backup and Recovery - orchestration, naming and retention for encrypted
// database backups

mod manager;
mod scratch;
mod types;

pub use manager::BackupManager;
pub use types::{
    BackupIdentifier, BackupStage, Environment, RetentionPolicy, RetentionTier,
    ScheduledRunReport, SweepReport, TIMESTAMP_FORMAT,
};
