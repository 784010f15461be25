mod backup;
mod cleanup;
mod progress;
mod restore;
mod schedule;
mod serve;

// Backup commands
pub use backup::{run_create_backup, run_delete_backup, run_list_backups, run_show_backup};

// Restore commands
pub use restore::{restore_options, run_list_restores, run_restore_backup};

// Cleanup
pub use cleanup::run_cleanup;

// Schedule commands
pub use schedule::{add_schedule, list_schedules, remove_schedule, run_tick, set_schedule_active};

// HTTP server
pub use serve::run_serve;
