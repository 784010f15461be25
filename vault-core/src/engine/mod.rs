//! 备份恢复引擎
//!
//! `VaultEngine` 在进程启动时构建一次，命令行和 HTTP 服务都通过它访问
//! 目录库、线上数据库和各个服务。恢复互斥锁是 `RestoreService` 的字段，
//! 不存在全局状态。

#[cfg(test)]
mod tests;

use crate::backup::{BackupRequest, BackupService, BackupSettings};
use crate::catalog::{
    Backup, BackupKind, BackupSchedule, Cadence, Catalog, Page, RestoreOptions, RestoreRecord,
};
use crate::config::AppConfig;
use crate::live::LiveDatabase;
use crate::progress::{ProgressSnapshot, ProgressTracker, wait_until_finished};
use crate::restore::{RestoreService, RestoreSettings};
use crate::scheduler::{CleanupReport, Scheduler, TriggeredBackup};
use crate::schema::CollectionRegistry;
use crate::{Result, VaultError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// 已结束的任务在进度表中保留的时间
const FINISHED_JOB_RETENTION_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct VaultEngine {
    config: Arc<AppConfig>,
    catalog: Catalog,
    live: LiveDatabase,
    registry: Arc<CollectionRegistry>,
    tracker: ProgressTracker,
    backups: BackupService,
    restores: RestoreService,
    scheduler: Scheduler,
}

impl VaultEngine {
    /// 按配置打开目录库和线上数据库
    pub async fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;
        let catalog = Catalog::open(&config.catalog.path).await?;
        Self::with_catalog(config, catalog).await
    }

    /// 使用已打开的目录库构建引擎
    pub async fn with_catalog(config: AppConfig, catalog: Catalog) -> Result<Self> {
        let (backups_failed, restores_failed) = catalog.fail_interrupted_jobs().await?;
        if backups_failed + restores_failed > 0 {
            warn!(
                "上次运行中断的任务已标记为失败: {} 个备份, {} 个恢复",
                backups_failed, restores_failed
            );
        }

        let live = LiveDatabase::open(&config.database)?;
        let registry = Arc::new(config.registry()?);
        let tracker = ProgressTracker::new();

        let backups = BackupService::new(
            catalog.clone(),
            live.clone(),
            registry.clone(),
            tracker.clone(),
            BackupSettings {
                storage_root: config.get_storage_root(),
                media_root: config.get_media_root(),
                compression_level: config.backup.compression_level,
                granularity: config.backup.granularity,
            },
        );
        let restores = RestoreService::new(
            catalog.clone(),
            live.clone(),
            registry.clone(),
            tracker.clone(),
            backups.clone(),
            RestoreSettings {
                media_root: config.get_media_root(),
                batch_size: config.restore.batch_size,
            },
        );
        let scheduler = Scheduler::new(catalog.clone(), backups.clone());

        info!(
            engine = ?live.engine(),
            collections = registry.len(),
            "备份引擎已就绪"
        );

        Ok(Self {
            config: Arc::new(config),
            catalog,
            live,
            registry,
            tracker,
            backups,
            restores,
            scheduler,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn live(&self) -> &LiveDatabase {
        &self.live
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    // ========== 任务 ==========

    /// 在后台启动备份，立即返回 pending 状态的记录
    pub async fn start_backup(&self, kind: BackupKind, name: Option<String>, created_by: &str) -> Result<Backup> {
        self.backups
            .start_backup(BackupRequest {
                kind,
                name,
                created_by: created_by.to_string(),
            })
            .await
    }

    /// 执行备份并等待结束
    pub async fn create_backup(&self, kind: BackupKind, name: Option<String>, created_by: &str) -> Result<Backup> {
        self.backups
            .create_backup(BackupRequest {
                kind,
                name,
                created_by: created_by.to_string(),
            })
            .await
    }

    /// 在后台启动恢复；已有恢复在进行时返回 `RestoreInProgress`
    pub async fn start_restore(&self, backup_id: Uuid, options: RestoreOptions) -> Result<RestoreRecord> {
        self.restores.start_restore(backup_id, options).await
    }

    pub async fn restore_backup(&self, backup_id: Uuid, options: RestoreOptions) -> Result<RestoreRecord> {
        self.restores.restore_backup(backup_id, options).await
    }

    pub fn is_restore_running(&self) -> bool {
        self.restores.is_busy()
    }

    pub fn job_progress(&self, job_id: Uuid) -> Option<ProgressSnapshot> {
        self.tracker.get(job_id)
    }

    pub fn jobs(&self) -> Vec<ProgressSnapshot> {
        self.tracker.list()
    }

    pub fn subscribe(&self, job_id: Uuid) -> Option<watch::Receiver<ProgressSnapshot>> {
        self.tracker.subscribe(job_id)
    }

    /// 请求取消任务，在下一个集合边界生效
    pub fn cancel(&self, job_id: Uuid) -> Result<()> {
        if self.tracker.cancel(job_id) {
            info!(job_id = %job_id, "已请求取消任务");
            Ok(())
        } else if self.tracker.get(job_id).is_some() {
            Err(VaultError::invalid_state(format!("任务 {job_id} 已经结束")))
        } else {
            Err(VaultError::not_found(format!("任务 {job_id}")))
        }
    }

    /// 等待后台任务结束
    pub async fn wait_for(&self, job_id: Uuid) -> Result<ProgressSnapshot> {
        let receiver = self
            .tracker
            .subscribe(job_id)
            .ok_or_else(|| VaultError::not_found(format!("任务 {job_id}")))?;
        Ok(wait_until_finished(receiver).await)
    }

    // ========== 备份记录 ==========

    pub async fn get_backup(&self, id: Uuid) -> Result<Backup> {
        self.catalog.get_backup(id).await
    }

    pub async fn list_backups(&self, page: u32, per_page: u32) -> Result<Page<Backup>> {
        self.catalog.list_backups(page, per_page).await
    }

    pub async fn delete_backup(&self, id: Uuid) -> Result<()> {
        self.backups.delete_backup(id).await
    }

    /// 可下载的归档路径，只有已完成的备份才有
    pub async fn archive_for_download(&self, id: Uuid) -> Result<Backup> {
        let backup = self.backups.completed_backup(id).await?;
        match &backup.archive_path {
            Some(path) if path.exists() => Ok(backup),
            _ => Err(VaultError::not_found(format!("备份 {id} 的归档文件"))),
        }
    }

    // ========== 恢复记录 ==========

    pub async fn get_restore(&self, id: Uuid) -> Result<RestoreRecord> {
        self.catalog.get_restore(id).await
    }

    pub async fn list_restores(&self, page: u32, per_page: u32) -> Result<Page<RestoreRecord>> {
        self.catalog.list_restores(page, per_page).await
    }

    // ========== 计划 ==========

    pub async fn create_schedule(&self, name: &str, cadence: Cadence, kind: BackupKind) -> Result<BackupSchedule> {
        if name.trim().is_empty() {
            return Err(VaultError::invalid_state("计划名称不能为空"));
        }
        self.catalog.create_schedule(name, cadence, kind).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<BackupSchedule>> {
        self.catalog.list_schedules().await
    }

    pub async fn set_schedule_active(&self, id: i64, active: bool) -> Result<()> {
        self.catalog.set_schedule_active(id, active).await
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<()> {
        self.catalog.delete_schedule(id).await
    }

    // ========== 维护 ==========

    /// 触发到期的计划；配置了保留天数时顺带清理过期备份
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TriggeredBackup>> {
        let triggered = self.scheduler.tick(now).await?;
        if let Some(days) = self.config.scheduler.retention_days {
            let report = self.scheduler.cleanup(days, false, now).await?;
            if !report.deleted.is_empty() {
                info!("自动清理了 {} 个过期备份", report.deleted.len());
            }
        }
        self.tracker
            .prune_finished(now - Duration::seconds(FINISHED_JOB_RETENTION_SECS));
        Ok(triggered)
    }

    pub async fn cleanup(&self, retention_days: u32, dry_run: bool, now: DateTime<Utc>) -> Result<CleanupReport> {
        self.scheduler.cleanup(retention_days, dry_run, now).await
    }
}
