use crate::Result;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use super::models::{BackupRow, RestoreRow, ScheduleRow};

/// 目录库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 备份记录 ==========
    /// 插入备份记录
    InsertBackup {
        row: BackupRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 根据ID获取备份记录
    GetBackup {
        id: String,
        respond_to: oneshot::Sender<Result<Option<BackupRow>>>,
    },
    /// 分页获取备份记录（按创建时间倒序）
    ListBackups {
        offset: i64,
        limit: i64,
        respond_to: oneshot::Sender<Result<(Vec<BackupRow>, i64)>>,
    },
    /// 获取创建时间早于指定时间的备份
    ListBackupsCreatedBefore {
        cutoff: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<Vec<BackupRow>>>,
    },
    /// 更新备份进度（只增不减）
    UpdateBackupProgress {
        id: String,
        percent: i32,
        label: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 按期望的前置状态切换备份状态，返回受影响行数
    TransitionBackup {
        id: String,
        from: Vec<String>,
        to: String,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<Result<usize>>,
    },
    /// 写入归档信息
    SetBackupArchive {
        id: String,
        archive_path: String,
        archive_size_bytes: i64,
        checksum: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除备份记录及其已结束的恢复记录
    DeleteBackup {
        id: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 恢复记录 ==========
    /// 插入恢复记录
    InsertRestore {
        row: RestoreRow,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 根据ID获取恢复记录
    GetRestore {
        id: String,
        respond_to: oneshot::Sender<Result<Option<RestoreRow>>>,
    },
    /// 分页获取恢复记录
    ListRestores {
        offset: i64,
        limit: i64,
        respond_to: oneshot::Sender<Result<(Vec<RestoreRow>, i64)>>,
    },
    /// 更新恢复进度（只增不减）
    UpdateRestoreProgress {
        id: String,
        percent: i32,
        label: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 按期望的前置状态切换恢复状态
    TransitionRestore {
        id: String,
        from: Vec<String>,
        to: String,
        result_summary: Option<String>,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<Result<usize>>,
    },
    /// 统计引用指定备份且仍在进行中的恢复
    CountActiveRestores {
        backup_id: String,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 把上次进程遗留的未结束任务标记为失败
    FailInterruptedJobs {
        message: String,
        respond_to: oneshot::Sender<Result<(usize, usize)>>,
    },

    // ========== 备份计划 ==========
    /// 创建备份计划
    InsertSchedule {
        name: String,
        cadence: String,
        kind: String,
        created_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<i64>>,
    },
    /// 获取全部备份计划
    ListSchedules {
        respond_to: oneshot::Sender<Result<Vec<ScheduleRow>>>,
    },
    /// 启用或停用备份计划
    SetScheduleActive {
        id: i64,
        active: bool,
        respond_to: oneshot::Sender<Result<usize>>,
    },
    /// 记录计划最近一次执行时间
    UpdateScheduleLastRun {
        id: i64,
        last_run_at: DateTime<Utc>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除备份计划
    DeleteSchedule {
        id: i64,
        respond_to: oneshot::Sender<Result<usize>>,
    },
}
