use crate::constants::{backup, config, restore, scheduler, server};
use crate::error::{Result, VaultError};
use crate::schema::{CollectionRegistry, CollectionSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub catalog: CatalogConfig,
    pub database: LiveDatabaseConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

/// 归档存储配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: String,
}

/// 目录库（备份/恢复/计划记录）配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CatalogConfig {
    pub path: String,
}

/// 线上数据库引擎
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    DuckDb,
}

/// 线上数据库配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LiveDatabaseConfig {
    pub engine: EngineKind,
    pub path: String,
}

/// 媒体文件配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MediaConfig {
    pub root: String,
}

/// 备份粒度
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// 按集合导出，恢复时可以只选部分集合
    #[default]
    Collections,
    /// 整库导出，恢复时全部或全不
    Database,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Collections => "collections",
            Granularity::Database => "database",
        }
    }
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default)]
    pub granularity: Granularity,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            compression_level: backup::DEFAULT_COMPRESSION_LEVEL,
            granularity: Granularity::default(),
        }
    }
}

fn default_compression_level() -> u32 {
    backup::DEFAULT_COMPRESSION_LEVEL
}

/// 恢复相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RestoreConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            batch_size: restore::DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_batch_size() -> usize {
    restore::DEFAULT_BATCH_SIZE
}

/// 调度相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// 设置后每次调度检查都会清理过期备份
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: scheduler::DEFAULT_TICK_INTERVAL_SECS,
            retention_days: None,
        }
    }
}

fn default_tick_interval() -> u64 {
    scheduler::DEFAULT_TICK_INTERVAL_SECS
}

/// HTTP 服务配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: server::DEFAULT_BIND.to_string(),
        }
    }
}

fn default_bind() -> String {
    server::DEFAULT_BIND.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                root: backup::get_default_storage_dir()
                    .to_string_lossy()
                    .to_string(),
            },
            catalog: CatalogConfig {
                path: config::get_default_catalog_path()
                    .to_string_lossy()
                    .to_string(),
            },
            database: LiveDatabaseConfig {
                engine: EngineKind::Sqlite,
                path: "./data/store.db".to_string(),
            },
            media: MediaConfig {
                root: config::get_default_media_root()
                    .to_string_lossy()
                    .to_string(),
            },
            backup: BackupConfig::default(),
            restore: RestoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            collections: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：vault.toml -> .vault.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in &config::CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        Err(VaultError::invalid_config(format!(
            "未找到配置文件，请先运行 'vault-cli init' 创建 {}",
            config::DEFAULT_CONFIG_FILE
        )))
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 解析并校验配置内容
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_with_comments();
        fs::write(&path, content)?;
        Ok(())
    }

    /// 生成带注释的TOML配置
    fn to_toml_with_comments(&self) -> String {
        const TEMPLATE: &str = include_str!("../templates/vault.toml.template");

        let engine = match self.database.engine {
            EngineKind::Sqlite => "sqlite",
            EngineKind::DuckDb => "duckdb",
        };

        TEMPLATE
            .replace("{storage_root}", &self.storage.root)
            .replace("{catalog_path}", &self.catalog.path)
            .replace("{database_engine}", engine)
            .replace("{database_path}", &self.database.path)
            .replace("{media_root}", &self.media.root)
            .replace(
                "{compression_level}",
                &self.backup.compression_level.to_string(),
            )
            .replace("{granularity}", self.backup.granularity.as_str())
            .replace("{batch_size}", &self.restore.batch_size.to_string())
            .replace(
                "{tick_interval_secs}",
                &self.scheduler.tick_interval_secs.to_string(),
            )
            .replace("{server_bind}", &self.server.bind)
    }

    /// 校验取值范围和集合声明
    pub fn validate(&self) -> Result<()> {
        let level = self.backup.compression_level;
        if !(backup::MIN_COMPRESSION_LEVEL..=backup::MAX_COMPRESSION_LEVEL).contains(&level) {
            return Err(VaultError::invalid_config(format!(
                "压缩级别必须在 {}-{} 之间，当前为 {}",
                backup::MIN_COMPRESSION_LEVEL,
                backup::MAX_COMPRESSION_LEVEL,
                level
            )));
        }
        if self.restore.batch_size == 0 {
            return Err(VaultError::invalid_config("restore.batch_size 必须大于 0"));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(VaultError::invalid_config(
                "scheduler.tick_interval_secs 必须大于 0",
            ));
        }
        self.registry()?;
        Ok(())
    }

    /// 根据配置构建集合注册表
    pub fn registry(&self) -> Result<CollectionRegistry> {
        CollectionRegistry::new(self.collections.clone())
    }

    /// 确保存储目录存在
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.storage.root)?;
        if let Some(parent) = Path::new(&self.catalog.path).parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// 获取备份存储根目录
    pub fn get_storage_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.root)
    }

    /// 获取媒体根目录
    pub fn get_media_root(&self) -> PathBuf {
        PathBuf::from(&self.media.root)
    }
}
