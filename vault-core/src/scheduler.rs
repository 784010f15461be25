use crate::backup::{BackupRequest, BackupService};
use crate::catalog::{Backup, Catalog};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Result, VaultError};

/// 按计划触发备份，并清理过期备份
#[derive(Debug, Clone)]
pub struct Scheduler {
    catalog: Catalog,
    backups: BackupService,
}

/// 一次调度检查触发的备份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredBackup {
    pub schedule_id: i64,
    pub schedule_name: String,
    pub backup_id: Uuid,
}

/// 被清理跳过的备份及原因
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedBackup {
    pub backup_id: Uuid,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub cutoff: Option<DateTime<Utc>>,
    /// 已删除（dry run 时为将要删除）的备份
    pub deleted: Vec<Backup>,
    pub skipped: Vec<SkippedBackup>,
}

impl Scheduler {
    pub fn new(catalog: Catalog, backups: BackupService) -> Self {
        Self { catalog, backups }
    }

    /// 为每个到期的计划启动一次后台备份并记录运行时间
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TriggeredBackup>> {
        let mut triggered = Vec::new();

        for schedule in self.catalog.list_schedules().await? {
            if !schedule.is_due(now) {
                continue;
            }

            let request = BackupRequest {
                kind: schedule.kind,
                name: Some(format!(
                    "{}_{}",
                    schedule.name,
                    now.format("%Y%m%d_%H%M%S")
                )),
                created_by: format!("schedule:{}", schedule.id),
            };
            match self.backups.start_backup(request).await {
                Ok(backup) => {
                    self.catalog.mark_schedule_run(schedule.id, now).await?;
                    info!(
                        schedule_id = schedule.id,
                        backup_id = %backup.id,
                        "计划 {} 已触发备份",
                        schedule.name
                    );
                    triggered.push(TriggeredBackup {
                        schedule_id: schedule.id,
                        schedule_name: schedule.name,
                        backup_id: backup.id,
                    });
                }
                // 不更新运行时间，下次检查会重试
                Err(e) => warn!("计划 {} 触发备份失败: {}", schedule.name, e),
            }
        }

        Ok(triggered)
    }

    /// 删除创建时间早于保留期的备份
    ///
    /// 进行中的备份和正被恢复任务使用的备份会被跳过。
    pub async fn cleanup(
        &self,
        retention_days: u32,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        if retention_days == 0 {
            return Err(VaultError::invalid_config("保留天数必须大于 0"));
        }

        let cutoff = now - Duration::days(i64::from(retention_days));
        let candidates = self.catalog.backups_created_before(cutoff).await?;
        info!(
            "清理 {} 之前创建的备份，共 {} 个候选",
            cutoff.format("%Y-%m-%d %H:%M:%S"),
            candidates.len()
        );

        let mut report = CleanupReport {
            dry_run,
            cutoff: Some(cutoff),
            ..CleanupReport::default()
        };

        for backup in candidates {
            let skip = |reason: String| SkippedBackup {
                backup_id: backup.id,
                name: backup.name.clone(),
                reason,
            };

            if !backup.status.is_terminal() {
                report
                    .skipped
                    .push(skip(format!("备份仍在进行中 ({})", backup.status)));
                continue;
            }
            if self.catalog.active_restores_for(backup.id).await? > 0 {
                report.skipped.push(skip("正在被恢复任务使用".to_string()));
                continue;
            }

            if !dry_run {
                if let Err(e) = self.backups.delete_backup(backup.id).await {
                    warn!("删除备份 {} 失败: {}", backup.id, e);
                    report.skipped.push(skip(e.to_string()));
                    continue;
                }
                info!("🗑️ 已删除过期备份: {} ({})", backup.name, backup.id);
            }
            report.deleted.push(backup);
        }

        Ok(report)
    }
}
