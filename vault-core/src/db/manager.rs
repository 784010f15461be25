use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;
use super::models::{BackupRow, RestoreRow, ScheduleRow};

/// 目录库管理器
///
/// 所有操作都通过消息发给专用线程上的 Actor 执行，
/// 克隆后的管理器共享同一个 Actor。
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 打开（或创建）目录库文件
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let actor = DuckDbActor::new(db_path)?;
        Self::start(actor).await
    }

    /// 创建内存目录库（测试用）
    pub async fn new_memory() -> Result<Self> {
        let actor = DuckDbActor::new_memory()?;
        Self::start(actor).await
    }

    async fn start(actor: DuckDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(100);

        // DuckDB 调用是阻塞的，放到独立线程上避免占用异步运行时
        std::thread::Builder::new()
            .name("vault-catalog".to_string())
            .spawn(move || actor.run(receiver))?;

        let manager = Self { sender };
        manager
            .request(|respond_to| DbMessage::InitTables { respond_to })
            .await?;

        Ok(manager)
    }

    /// 发送消息并等待 Actor 回复
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| VaultError::custom("目录库Actor已关闭"))?;

        receiver
            .await
            .map_err(|_| VaultError::custom("目录库Actor未返回结果"))?
    }

    pub async fn insert_backup(&self, row: BackupRow) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertBackup { row, respond_to })
            .await
    }

    pub async fn get_backup(&self, id: &str) -> Result<Option<BackupRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetBackup { id, respond_to })
            .await
    }

    /// 分页列出备份，返回当前页和总数
    pub async fn list_backups(&self, offset: i64, limit: i64) -> Result<(Vec<BackupRow>, i64)> {
        self.request(|respond_to| DbMessage::ListBackups {
            offset,
            limit,
            respond_to,
        })
        .await
    }

    pub async fn list_backups_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BackupRow>> {
        self.request(|respond_to| DbMessage::ListBackupsCreatedBefore { cutoff, respond_to })
            .await
    }

    pub async fn update_backup_progress(&self, id: &str, percent: i32, label: &str) -> Result<()> {
        let id = id.to_string();
        let label = label.to_string();
        self.request(|respond_to| DbMessage::UpdateBackupProgress {
            id,
            percent,
            label,
            respond_to,
        })
        .await
    }

    /// 只有当前状态属于 `from` 时才切换，返回是否切换成功
    pub async fn transition_backup(
        &self,
        id: &str,
        from: &[&str],
        to: &str,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let id = id.to_string();
        let from = from.iter().map(|s| s.to_string()).collect();
        let to = to.to_string();
        let changed = self
            .request(|respond_to| DbMessage::TransitionBackup {
                id,
                from,
                to,
                error_message,
                finished_at,
                respond_to,
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn set_backup_archive(
        &self,
        id: &str,
        archive_path: String,
        archive_size_bytes: i64,
        checksum: String,
    ) -> Result<()> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::SetBackupArchive {
            id,
            archive_path,
            archive_size_bytes,
            checksum,
            respond_to,
        })
        .await
    }

    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::DeleteBackup { id, respond_to })
            .await
    }

    pub async fn insert_restore(&self, row: RestoreRow) -> Result<()> {
        self.request(|respond_to| DbMessage::InsertRestore { row, respond_to })
            .await
    }

    pub async fn get_restore(&self, id: &str) -> Result<Option<RestoreRow>> {
        let id = id.to_string();
        self.request(|respond_to| DbMessage::GetRestore { id, respond_to })
            .await
    }

    pub async fn list_restores(&self, offset: i64, limit: i64) -> Result<(Vec<RestoreRow>, i64)> {
        self.request(|respond_to| DbMessage::ListRestores {
            offset,
            limit,
            respond_to,
        })
        .await
    }

    pub async fn update_restore_progress(&self, id: &str, percent: i32, label: &str) -> Result<()> {
        let id = id.to_string();
        let label = label.to_string();
        self.request(|respond_to| DbMessage::UpdateRestoreProgress {
            id,
            percent,
            label,
            respond_to,
        })
        .await
    }

    pub async fn transition_restore(
        &self,
        id: &str,
        from: &[&str],
        to: &str,
        result_summary: Option<String>,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let id = id.to_string();
        let from = from.iter().map(|s| s.to_string()).collect();
        let to = to.to_string();
        let changed = self
            .request(|respond_to| DbMessage::TransitionRestore {
                id,
                from,
                to,
                result_summary,
                error_message,
                finished_at,
                respond_to,
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn count_active_restores(&self, backup_id: &str) -> Result<i64> {
        let backup_id = backup_id.to_string();
        self.request(|respond_to| DbMessage::CountActiveRestores {
            backup_id,
            respond_to,
        })
        .await
    }

    /// 返回 (失败的备份数, 失败的恢复数)
    pub async fn fail_interrupted_jobs(&self, message: &str) -> Result<(usize, usize)> {
        let message = message.to_string();
        self.request(|respond_to| DbMessage::FailInterruptedJobs {
            message,
            respond_to,
        })
        .await
    }

    pub async fn insert_schedule(
        &self,
        name: &str,
        cadence: &str,
        kind: &str,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let name = name.to_string();
        let cadence = cadence.to_string();
        let kind = kind.to_string();
        self.request(|respond_to| DbMessage::InsertSchedule {
            name,
            cadence,
            kind,
            created_at,
            respond_to,
        })
        .await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRow>> {
        self.request(|respond_to| DbMessage::ListSchedules { respond_to })
            .await
    }

    pub async fn set_schedule_active(&self, id: i64, active: bool) -> Result<bool> {
        let changed = self
            .request(|respond_to| DbMessage::SetScheduleActive {
                id,
                active,
                respond_to,
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn update_schedule_last_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.request(|respond_to| DbMessage::UpdateScheduleLastRun {
            id,
            last_run_at,
            respond_to,
        })
        .await
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<bool> {
        let changed = self
            .request(|respond_to| DbMessage::DeleteSchedule { id, respond_to })
            .await?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup_row(id: &str, status: &str, created_at: DateTime<Utc>) -> BackupRow {
        BackupRow {
            id: id.to_string(),
            name: format!("backup_{id}"),
            kind: "full".to_string(),
            status: status.to_string(),
            progress_percent: 0,
            current_operation: String::new(),
            created_by: "test".to_string(),
            created_at,
            completed_at: None,
            archive_path: None,
            archive_size_bytes: None,
            checksum: None,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_backup_rows_and_guarded_transitions() {
        let db = DuckDbManager::new_memory().await.unwrap();
        db.insert_backup(backup_row("b1", "pending", Utc::now()))
            .await
            .unwrap();

        // pending 不能直接跳到 completed
        assert!(
            !db.transition_backup("b1", &["in_progress"], "completed", None, None)
                .await
                .unwrap()
        );
        assert!(
            db.transition_backup("b1", &["pending"], "in_progress", None, None)
                .await
                .unwrap()
        );

        db.update_backup_progress("b1", 40, "导出 customers").await.unwrap();
        db.update_backup_progress("b1", 20, "旧的进度").await.unwrap();
        let row = db.get_backup("b1").await.unwrap().unwrap();
        assert_eq!(row.progress_percent, 40);
        assert_eq!(row.current_operation, "旧的进度");

        assert!(
            db.transition_backup("b1", &["in_progress"], "completed", None, Some(Utc::now()))
                .await
                .unwrap()
        );
        let row = db.get_backup("b1").await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.progress_percent, 100);
        assert!(row.completed_at.is_some());

        // 已完成的记录不能再回到失败
        assert!(
            !db.transition_backup("b1", &["pending", "in_progress"], "failed", None, None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_list_backups_paginated_newest_first() {
        let db = DuckDbManager::new_memory().await.unwrap();
        let base = Utc::now();
        for i in 0..5 {
            let created_at = base - chrono::Duration::days(i);
            db.insert_backup(backup_row(&format!("b{i}"), "completed", created_at))
                .await
                .unwrap();
        }

        let (page, total) = db.list_backups(0, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "b0");
        assert_eq!(page[1].id, "b1");

        let old = db
            .list_backups_created_before(base - chrono::Duration::hours(36))
            .await
            .unwrap();
        let ids: Vec<&str> = old.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b4", "b3", "b2"]);
    }

    #[tokio::test]
    async fn test_fail_interrupted_jobs() {
        let db = DuckDbManager::new_memory().await.unwrap();
        db.insert_backup(backup_row("running", "in_progress", Utc::now()))
            .await
            .unwrap();
        db.insert_backup(backup_row("done", "completed", Utc::now()))
            .await
            .unwrap();

        let (backups, restores) = db.fail_interrupted_jobs("进程重启").await.unwrap();
        assert_eq!((backups, restores), (1, 0));

        let row = db.get_backup("running").await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error_message.as_deref(), Some("进程重启"));
        let row = db.get_backup("done").await.unwrap().unwrap();
        assert_eq!(row.status, "completed");
    }

    #[tokio::test]
    async fn test_schedule_crud() {
        let db = DuckDbManager::new_memory().await.unwrap();
        let id = db
            .insert_schedule("nightly", "daily", "full", Utc::now())
            .await
            .unwrap();

        assert!(db.set_schedule_active(id, false).await.unwrap());
        let schedules = db.list_schedules().await.unwrap();
        assert_eq!(schedules.len(), 1);
        assert!(!schedules[0].is_active);
        assert!(schedules[0].last_run_at.is_none());

        let now = Utc::now();
        db.update_schedule_last_run(id, now).await.unwrap();
        let schedules = db.list_schedules().await.unwrap();
        assert!(schedules[0].last_run_at.is_some());

        assert!(db.delete_schedule(id).await.unwrap());
        assert!(!db.delete_schedule(id).await.unwrap());
    }
}
