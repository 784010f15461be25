pub mod backup;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod constants;
pub mod constraints;
pub mod db;
pub mod engine;
pub mod error;
pub mod live;
pub mod progress;
pub mod restore;
pub mod scheduler;
pub mod schema;

pub use catalog::{
    Backup, BackupKind, BackupSchedule, Cadence, JobStatus, Page, RestoreOptions, RestoreRecord,
    RestoreSummary,
};
pub use config::AppConfig;
pub use engine::VaultEngine;
pub use error::{Result, VaultError};
pub use progress::{JobKind, ProgressSnapshot};
pub use scheduler::{CleanupReport, TriggeredBackup};
