use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 备份行（枚举字段以字符串存储）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub status: String,
    pub progress_percent: i32,
    pub current_operation: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archive_path: Option<String>,
    pub archive_size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub error_message: Option<String>,
}

/// 恢复行（选项和结果摘要以 JSON 文本存储）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRow {
    pub id: String,
    pub backup_id: String,
    pub status: String,
    pub progress_percent: i32,
    pub current_operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub options: String,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
}

/// 计划行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: i64,
    pub name: String,
    pub cadence: String,
    pub kind: String,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
