use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("DuckDB数据库错误: {0}")]
    DuckDb(String),

    #[error("SQLite数据库错误: {0}")]
    Sqlite(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("UUID 错误: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("归档已损坏: {0}")]
    ArchiveCorrupt(String),

    #[error("归档版本 {found} 高于当前支持的版本 {supported}")]
    UnsupportedSchemaVersion { found: u32, supported: u32 },

    #[error("已有恢复任务正在进行: {0}")]
    RestoreInProgress(String),

    #[error("当前数据库引擎无法关闭外键检查: {0}")]
    IntegrityDisableUnsupported(String),

    #[error("集合 {collection} 导出失败: {message}")]
    PartialBackup { collection: String, message: String },

    #[error("数据结构错误: {0}")]
    Schema(String),

    #[error("恢复校验失败: {0}")]
    Verification(String),

    #[error("任务已取消")]
    Cancelled,

    #[error("记录不存在: {0}")]
    NotFound(String),

    #[error("状态不允许此操作: {0}")]
    InvalidState(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for VaultError {
    fn from(err: duckdb::Error) -> Self {
        VaultError::DuckDb(err.to_string())
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Sqlite(err.to_string())
    }
}

impl VaultError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::ArchiveCorrupt(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// 稳定的错误代码，供 HTTP 响应和命令行摘要使用
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Config(_) | VaultError::InvalidConfig(_) => "CONFIG_ERROR",
            VaultError::DuckDb(_) | VaultError::Sqlite(_) => "DATABASE_ERROR",
            VaultError::Io(_) | VaultError::WalkDir(_) | VaultError::StripPrefix(_) => "IO_ERROR",
            VaultError::Uuid(_) => "INVALID_ID",
            VaultError::Serde(_) => "SERIALIZATION_ERROR",
            VaultError::Join(_) => "TASK_ERROR",
            VaultError::ArchiveCorrupt(_) => "ARCHIVE_CORRUPT",
            VaultError::UnsupportedSchemaVersion { .. } => "UNSUPPORTED_SCHEMA_VERSION",
            VaultError::RestoreInProgress(_) => "RESTORE_IN_PROGRESS",
            VaultError::IntegrityDisableUnsupported(_) => "INTEGRITY_DISABLE_UNSUPPORTED",
            VaultError::PartialBackup { .. } => "PARTIAL_BACKUP",
            VaultError::Schema(_) => "SCHEMA_ERROR",
            VaultError::Verification(_) => "VERIFICATION_FAILED",
            VaultError::Cancelled => "CANCELLED",
            VaultError::NotFound(_) => "NOT_FOUND",
            VaultError::InvalidState(_) => "INVALID_STATE",
            VaultError::Custom(_) => "INTERNAL_ERROR",
        }
    }
}
