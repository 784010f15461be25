use crate::codec::media::SkippedFile;
use crate::config::Granularity;
use crate::db::{BackupRow, DuckDbManager, RestoreRow, ScheduleRow};
use crate::{Result, VaultError};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// 目录库 - DuckDB适配器，负责字符串和领域类型之间的转换
#[derive(Debug, Clone)]
pub struct Catalog {
    manager: DuckDbManager,
}

/// 备份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// 只备份数据库集合
    Database,
    /// 只备份媒体文件
    Media,
    /// 数据库加媒体
    Full,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Database => "database",
            BackupKind::Media => "media",
            BackupKind::Full => "full",
        }
    }

    pub fn includes_database(&self) -> bool {
        matches!(self, BackupKind::Database | BackupKind::Full)
    }

    pub fn includes_media(&self) -> bool {
        matches!(self, BackupKind::Media | BackupKind::Full)
    }
}

impl FromStr for BackupKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "database" => Ok(BackupKind::Database),
            "media" => Ok(BackupKind::Media),
            "full" => Ok(BackupKind::Full),
            other => Err(VaultError::custom(format!("未知的备份类型: {other}"))),
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份和恢复任务共用的状态
///
/// 只允许 pending -> in_progress -> completed|failed，
/// pending 也可以直接失败（例如启动前就被取消）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }

    /// 能够切换到 `next` 的所有前置状态
    fn predecessors_of(next: JobStatus) -> Vec<&'static str> {
        [JobStatus::Pending, JobStatus::InProgress]
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .map(|s| s.as_str())
            .collect()
    }
}

impl FromStr for JobStatus {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(VaultError::custom(format!("未知的任务状态: {other}"))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: Uuid,
    pub name: String,
    pub kind: BackupKind,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_operation: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archive_path: Option<PathBuf>,
    pub archive_size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub error_message: Option<String>,
}

impl TryFrom<BackupRow> for Backup {
    type Error = VaultError;

    fn try_from(row: BackupRow) -> Result<Self> {
        Ok(Backup {
            id: Uuid::parse_str(&row.id)?,
            name: row.name,
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            current_operation: row.current_operation,
            created_by: row.created_by,
            created_at: row.created_at,
            completed_at: row.completed_at,
            archive_path: row.archive_path.map(PathBuf::from),
            archive_size_bytes: row.archive_size_bytes.map(|s| s.max(0) as u64),
            checksum: row.checksum,
            error_message: row.error_message,
        })
    }
}

/// 恢复选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreOptions {
    /// 恢复前校验归档
    pub verify: bool,
    /// 恢复前先做一次完整备份
    pub pre_backup: bool,
    /// 跳过预备份和非必要校验
    pub quick_mode: bool,
    /// 是否恢复媒体文件
    pub restore_media: bool,
    /// 只恢复部分集合（仅 collections 粒度的备份支持）
    pub collections: Option<Vec<String>>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            verify: true,
            pre_backup: true,
            quick_mode: false,
            restore_media: true,
            collections: None,
        }
    }
}

impl RestoreOptions {
    /// 快速模式下不做预备份
    pub fn wants_pre_backup(&self) -> bool {
        self.pre_backup && !self.quick_mode
    }

    /// 快速模式下不做深度校验（逐文件校验和和行数核对）
    pub fn wants_deep_verification(&self) -> bool {
        self.verify && !self.quick_mode
    }
}

/// 单个集合的恢复结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    pub name: String,
    /// 清单中记录的行数
    pub expected: u64,
    /// 本次插入的行数（主键冲突被忽略的不计）
    pub inserted: u64,
    /// 恢复后表中的行数，未核对时为空
    pub actual: Option<u64>,
}

/// 恢复结果摘要
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub collections: Vec<CollectionOutcome>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub media_restored: usize,
    pub media_skipped: Vec<SkippedFile>,
    /// 恢复前自动创建的安全备份
    pub pre_backup_id: Option<Uuid>,
    /// 外键约束的处理方式（关闭检查 / 按依赖顺序）
    pub integrity_mode: Option<String>,
    /// 恢复所用连接上外键检查在结束时是否已重新开启
    #[serde(default)]
    pub integrity_checks_enabled: Option<bool>,
    pub granularity: Option<Granularity>,
}

/// 恢复记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub id: Uuid,
    pub backup_id: Uuid,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub current_operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub options: RestoreOptions,
    pub result_summary: Option<RestoreSummary>,
    pub error_message: Option<String>,
}

impl TryFrom<RestoreRow> for RestoreRecord {
    type Error = VaultError;

    fn try_from(row: RestoreRow) -> Result<Self> {
        let result_summary = match row.result_summary {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };

        Ok(RestoreRecord {
            id: Uuid::parse_str(&row.id)?,
            backup_id: Uuid::parse_str(&row.backup_id)?,
            status: row.status.parse()?,
            progress_percent: row.progress_percent.clamp(0, 100) as u8,
            current_operation: row.current_operation,
            started_at: row.started_at,
            finished_at: row.finished_at,
            options: serde_json::from_str(&row.options)?,
            result_summary,
            error_message: row.error_message,
        })
    }
}

/// 计划周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        }
    }

    /// 上次执行后下一次应执行的时间
    pub fn next_after(&self, last: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Daily => last + Duration::days(1),
            Cadence::Weekly => last + Duration::weeks(1),
            Cadence::Monthly => last
                .checked_add_months(Months::new(1))
                .unwrap_or(last + Duration::days(30)),
        }
    }
}

impl FromStr for Cadence {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            other => Err(VaultError::custom(format!("未知的计划周期: {other}"))),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 备份计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
    pub id: i64,
    pub name: String,
    pub cadence: Cadence,
    pub kind: BackupKind,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BackupSchedule {
    /// 从未执行过的计划立即到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        match self.last_run_at {
            Some(last) => self.cadence.next_after(last) <= now,
            None => true,
        }
    }
}

impl TryFrom<ScheduleRow> for BackupSchedule {
    type Error = VaultError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        Ok(BackupSchedule {
            id: row.id,
            name: row.name,
            cadence: row.cadence.parse()?,
            kind: row.kind.parse()?,
            is_active: row.is_active,
            last_run_at: row.last_run_at,
            created_at: row.created_at,
        })
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

fn page_bounds(page: u32, per_page: u32) -> (i64, i64) {
    let page = page.max(1);
    let per_page = per_page.max(1);
    (
        (i64::from(page) - 1) * i64::from(per_page),
        i64::from(per_page),
    )
}

impl Catalog {
    /// 连接到目录库文件
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = DuckDbManager::new(path).await?;
        Ok(Catalog { manager })
    }

    /// 连接到内存目录库 (主要用于测试)
    pub async fn open_in_memory() -> Result<Self> {
        let manager = DuckDbManager::new_memory().await?;
        Ok(Catalog { manager })
    }

    // ========== 备份 ==========

    /// 创建状态为 pending 的备份记录
    pub async fn create_backup(
        &self,
        name: Option<String>,
        kind: BackupKind,
        created_by: &str,
    ) -> Result<Backup> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let name = name.unwrap_or_else(|| {
            format!(
                "{}{}_{}",
                crate::constants::backup::BACKUP_PREFIX,
                kind.as_str(),
                created_at.format("%Y-%m-%d_%H-%M-%S")
            )
        });

        let row = BackupRow {
            id: id.to_string(),
            name,
            kind: kind.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            progress_percent: 0,
            current_operation: String::new(),
            created_by: created_by.to_string(),
            created_at,
            completed_at: None,
            archive_path: None,
            archive_size_bytes: None,
            checksum: None,
            error_message: None,
        };
        self.manager.insert_backup(row.clone()).await?;
        Backup::try_from(row)
    }

    pub async fn find_backup(&self, id: Uuid) -> Result<Option<Backup>> {
        match self.manager.get_backup(&id.to_string()).await? {
            Some(row) => Ok(Some(Backup::try_from(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<Backup> {
        self.find_backup(id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("备份 {id}")))
    }

    /// 分页列出备份，最新的在前；`page` 从 1 开始
    pub async fn list_backups(&self, page: u32, per_page: u32) -> Result<Page<Backup>> {
        let (offset, limit) = page_bounds(page, per_page);
        let (rows, total) = self.manager.list_backups(offset, limit).await?;
        let items = rows
            .into_iter()
            .map(Backup::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: page.max(1),
            per_page: per_page.max(1),
        })
    }

    pub async fn backups_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Backup>> {
        self.manager
            .list_backups_created_before(cutoff)
            .await?
            .into_iter()
            .map(Backup::try_from)
            .collect()
    }

    pub async fn update_backup_progress(&self, id: Uuid, percent: u8, label: &str) -> Result<()> {
        self.manager
            .update_backup_progress(&id.to_string(), i32::from(percent.min(100)), label)
            .await
    }

    async fn transition_backup(
        &self,
        id: Uuid,
        to: JobStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let finished_at = to.is_terminal().then(Utc::now);
        let changed = self
            .manager
            .transition_backup(
                &id.to_string(),
                &JobStatus::predecessors_of(to),
                to.as_str(),
                error_message,
                finished_at,
            )
            .await?;
        if changed {
            Ok(())
        } else {
            let current = self.get_backup(id).await?;
            Err(VaultError::invalid_state(format!(
                "备份 {id} 不能从 {} 切换到 {to}",
                current.status
            )))
        }
    }

    pub async fn mark_backup_started(&self, id: Uuid) -> Result<()> {
        self.transition_backup(id, JobStatus::InProgress, None).await
    }

    /// 写入归档信息并把备份标记为完成
    pub async fn complete_backup(
        &self,
        id: Uuid,
        archive_path: &Path,
        archive_size_bytes: u64,
        checksum: &str,
    ) -> Result<()> {
        self.manager
            .set_backup_archive(
                &id.to_string(),
                archive_path.to_string_lossy().to_string(),
                archive_size_bytes as i64,
                checksum.to_string(),
            )
            .await?;
        self.transition_backup(id, JobStatus::Completed, None).await
    }

    pub async fn fail_backup(&self, id: Uuid, message: &str) -> Result<()> {
        self.transition_backup(id, JobStatus::Failed, Some(message.to_string()))
            .await
    }

    pub async fn delete_backup_record(&self, id: Uuid) -> Result<()> {
        self.manager.delete_backup(&id.to_string()).await
    }

    // ========== 恢复 ==========

    pub async fn create_restore(
        &self,
        backup_id: Uuid,
        options: &RestoreOptions,
    ) -> Result<RestoreRecord> {
        let row = RestoreRow {
            id: Uuid::new_v4().to_string(),
            backup_id: backup_id.to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            progress_percent: 0,
            current_operation: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            options: serde_json::to_string(options)?,
            result_summary: None,
            error_message: None,
        };
        self.manager.insert_restore(row.clone()).await?;
        RestoreRecord::try_from(row)
    }

    pub async fn find_restore(&self, id: Uuid) -> Result<Option<RestoreRecord>> {
        match self.manager.get_restore(&id.to_string()).await? {
            Some(row) => Ok(Some(RestoreRecord::try_from(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_restore(&self, id: Uuid) -> Result<RestoreRecord> {
        self.find_restore(id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("恢复任务 {id}")))
    }

    pub async fn list_restores(&self, page: u32, per_page: u32) -> Result<Page<RestoreRecord>> {
        let (offset, limit) = page_bounds(page, per_page);
        let (rows, total) = self.manager.list_restores(offset, limit).await?;
        let items = rows
            .into_iter()
            .map(RestoreRecord::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
            page: page.max(1),
            per_page: per_page.max(1),
        })
    }

    pub async fn update_restore_progress(&self, id: Uuid, percent: u8, label: &str) -> Result<()> {
        self.manager
            .update_restore_progress(&id.to_string(), i32::from(percent.min(100)), label)
            .await
    }

    async fn transition_restore(
        &self,
        id: Uuid,
        to: JobStatus,
        summary: Option<&RestoreSummary>,
        error_message: Option<String>,
    ) -> Result<()> {
        let summary = summary.map(serde_json::to_string).transpose()?;
        let finished_at = to.is_terminal().then(Utc::now);
        let changed = self
            .manager
            .transition_restore(
                &id.to_string(),
                &JobStatus::predecessors_of(to),
                to.as_str(),
                summary,
                error_message,
                finished_at,
            )
            .await?;
        if changed {
            Ok(())
        } else {
            let current = self.get_restore(id).await?;
            Err(VaultError::invalid_state(format!(
                "恢复任务 {id} 不能从 {} 切换到 {to}",
                current.status
            )))
        }
    }

    pub async fn mark_restore_started(&self, id: Uuid) -> Result<()> {
        self.transition_restore(id, JobStatus::InProgress, None, None)
            .await
    }

    pub async fn complete_restore(&self, id: Uuid, summary: &RestoreSummary) -> Result<()> {
        self.transition_restore(id, JobStatus::Completed, Some(summary), None)
            .await
    }

    /// 失败时也保存已经得到的部分结果
    pub async fn fail_restore(
        &self,
        id: Uuid,
        message: &str,
        summary: Option<&RestoreSummary>,
    ) -> Result<()> {
        self.transition_restore(id, JobStatus::Failed, summary, Some(message.to_string()))
            .await
    }

    /// 引用该备份且尚未结束的恢复任务数
    pub async fn active_restores_for(&self, backup_id: Uuid) -> Result<u64> {
        let count = self
            .manager
            .count_active_restores(&backup_id.to_string())
            .await?;
        Ok(count.max(0) as u64)
    }

    /// 启动时把上次进程遗留的任务标记为失败
    pub async fn fail_interrupted_jobs(&self) -> Result<(usize, usize)> {
        self.manager
            .fail_interrupted_jobs("进程在任务完成前退出")
            .await
    }

    // ========== 计划 ==========

    pub async fn create_schedule(
        &self,
        name: &str,
        cadence: Cadence,
        kind: BackupKind,
    ) -> Result<BackupSchedule> {
        let created_at = Utc::now();
        let id = self
            .manager
            .insert_schedule(name, cadence.as_str(), kind.as_str(), created_at)
            .await?;
        Ok(BackupSchedule {
            id,
            name: name.to_string(),
            cadence,
            kind,
            is_active: true,
            last_run_at: None,
            created_at,
        })
    }

    pub async fn list_schedules(&self) -> Result<Vec<BackupSchedule>> {
        self.manager
            .list_schedules()
            .await?
            .into_iter()
            .map(BackupSchedule::try_from)
            .collect()
    }

    pub async fn set_schedule_active(&self, id: i64, active: bool) -> Result<()> {
        if self.manager.set_schedule_active(id, active).await? {
            Ok(())
        } else {
            Err(VaultError::not_found(format!("备份计划 {id}")))
        }
    }

    pub async fn mark_schedule_run(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.manager.update_schedule_last_run(id, at).await
    }

    pub async fn delete_schedule(&self, id: i64) -> Result<()> {
        if self.manager.delete_schedule(id).await? {
            Ok(())
        } else {
            Err(VaultError::not_found(format!("备份计划 {id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_never_go_backward() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_cadence_is_due() {
        let now = Utc::now();
        let mut schedule = BackupSchedule {
            id: 1,
            name: "nightly".to_string(),
            cadence: Cadence::Daily,
            kind: BackupKind::Full,
            is_active: true,
            last_run_at: None,
            created_at: now,
        };
        assert!(schedule.is_due(now));

        schedule.last_run_at = Some(now - Duration::hours(23));
        assert!(!schedule.is_due(now));
        schedule.last_run_at = Some(now - Duration::hours(25));
        assert!(schedule.is_due(now));

        schedule.is_active = false;
        assert!(!schedule.is_due(now));

        schedule.is_active = true;
        schedule.cadence = Cadence::Weekly;
        assert!(!schedule.is_due(now));
        schedule.last_run_at = Some(now - Duration::days(8));
        assert!(schedule.is_due(now));
    }

    #[test]
    fn test_monthly_cadence_clamps_to_month_end() {
        let jan31 = DateTime::parse_from_rfc3339("2024-01-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = Cadence::Monthly.next_after(jan31);
        assert_eq!(next.format("%Y-%m-%d").to_string(), "2024-02-29");
    }

    #[tokio::test]
    async fn test_backup_lifecycle_through_catalog() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let backup = catalog
            .create_backup(None, BackupKind::Database, "cli")
            .await
            .unwrap();
        assert_eq!(backup.status, JobStatus::Pending);
        assert!(backup.name.starts_with("backup_database_"));

        // 未开始的任务不能直接完成
        let err = catalog
            .complete_backup(backup.id, Path::new("/tmp/x.tar.gz"), 10, "abc")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidState(_)));

        catalog.mark_backup_started(backup.id).await.unwrap();
        catalog
            .complete_backup(backup.id, Path::new("/tmp/x.tar.gz"), 10, "abc")
            .await
            .unwrap();

        let loaded = catalog.get_backup(backup.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress_percent, 100);
        assert_eq!(loaded.archive_size_bytes, Some(10));
        assert_eq!(loaded.checksum.as_deref(), Some("abc"));

        assert!(catalog.fail_backup(backup.id, "late").await.is_err());
    }

    #[tokio::test]
    async fn test_restore_record_round_trips_options_and_summary() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        let backup_id = Uuid::new_v4();
        let options = RestoreOptions {
            quick_mode: true,
            collections: Some(vec!["orders".to_string()]),
            ..RestoreOptions::default()
        };

        let restore = catalog.create_restore(backup_id, &options).await.unwrap();
        assert_eq!(catalog.active_restores_for(backup_id).await.unwrap(), 1);

        catalog.mark_restore_started(restore.id).await.unwrap();
        let summary = RestoreSummary {
            collections: vec![CollectionOutcome {
                name: "orders".to_string(),
                expected: 4,
                inserted: 4,
                actual: None,
            }],
            warnings: vec!["集合 legacy 已不存在".to_string()],
            ..RestoreSummary::default()
        };
        catalog.complete_restore(restore.id, &summary).await.unwrap();

        let loaded = catalog.get_restore(restore.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.options, options);
        assert_eq!(loaded.result_summary, Some(summary));
        assert!(loaded.finished_at.is_some());
        assert_eq!(catalog.active_restores_for(backup_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let catalog = Catalog::open_in_memory().await.unwrap();
        assert!(matches!(
            catalog.get_backup(Uuid::new_v4()).await,
            Err(VaultError::NotFound(_))
        ));
        assert!(matches!(
            catalog.set_schedule_active(42, false).await,
            Err(VaultError::NotFound(_))
        ));
    }
}
