use crate::cli::{Commands, ScheduleCommand};
use crate::commands;
use std::path::Path;
use std::sync::Arc;
use vault_core::{AppConfig, Result, VaultEngine};

#[derive(Clone)]
pub struct CliApp {
    pub engine: Arc<VaultEngine>,
}

impl CliApp {
    /// 加载配置并打开引擎；未指定路径时按默认顺序查找配置文件
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AppConfig::load_from_file(path)?,
            None => AppConfig::find_and_load_config()?,
        };
        let engine = VaultEngine::open(config).await?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::CreateBackup { kind, name } => {
                commands::run_create_backup(self, kind.into(), name).await
            }
            Commands::RestoreBackup {
                backup_id,
                force,
                quick,
                no_verify,
                no_pre_backup,
                no_media,
                collections,
            } => {
                let options = commands::restore_options(
                    quick,
                    no_verify,
                    no_pre_backup,
                    no_media,
                    collections,
                );
                commands::run_restore_backup(self, backup_id, options, force).await
            }
            Commands::CleanupBackups {
                retention_days,
                dry_run,
                force,
            } => commands::run_cleanup(self, retention_days, dry_run, force).await,
            Commands::ListBackups { page, per_page } => {
                commands::run_list_backups(self, page, per_page).await
            }
            Commands::ShowBackup { backup_id } => commands::run_show_backup(self, backup_id).await,
            Commands::DeleteBackup { backup_id, force } => {
                commands::run_delete_backup(self, backup_id, force).await
            }
            Commands::ListRestores { page, per_page } => {
                commands::run_list_restores(self, page, per_page).await
            }
            Commands::Schedule(cmd) => self.run_schedule_command(cmd).await,
            Commands::Tick => commands::run_tick(self).await,
            Commands::Serve { bind } => commands::run_serve(self, bind).await,
        }
    }

    async fn run_schedule_command(&self, cmd: ScheduleCommand) -> Result<()> {
        match cmd {
            ScheduleCommand::Add {
                name,
                cadence,
                kind,
            } => commands::add_schedule(self, &name, cadence.into(), kind.into()).await,
            ScheduleCommand::List => commands::list_schedules(self).await,
            ScheduleCommand::Enable { id } => commands::set_schedule_active(self, id, true).await,
            ScheduleCommand::Disable { id } => commands::set_schedule_active(self, id, false).await,
            ScheduleCommand::Remove { id } => commands::remove_schedule(self, id).await,
        }
    }
}
