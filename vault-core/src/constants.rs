/// 归档格式相关常量
pub mod archive {
    /// 当前归档格式版本，高于此版本的归档无法恢复
    pub const SCHEMA_VERSION: u32 = 1;

    /// 归档内的清单文件名
    pub const MANIFEST_FILE_NAME: &str = "manifest.json";

    /// 归档内存放集合导出文件的目录
    pub const DUMPS_DIR_NAME: &str = "dumps";

    /// 集合导出文件扩展名（JSON Lines）
    pub const DUMP_EXTENSION: &str = "jsonl";

    /// 嵌套的媒体容器文件名
    pub const MEDIA_CONTAINER_NAME: &str = "media.tar.gz";

    /// 媒体容器内的文件清单
    pub const MEDIA_MANIFEST_NAME: &str = "media-manifest.json";

    /// 媒体容器内的文件前缀
    pub const MEDIA_FILES_PREFIX: &str = "files";

    /// 最终归档扩展名
    pub const ARCHIVE_EXTENSION: &str = "tar.gz";

    /// 备份过程中使用的临时工作目录
    pub const WORK_DIR_NAME: &str = "work";

    /// 恢复时解包归档的临时目录前缀
    pub const RESTORE_STAGING_PREFIX: &str = "restore-";
}

/// 备份相关默认值
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 默认压缩级别 (1-9)
    pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

    /// 最小压缩级别
    pub const MIN_COMPRESSION_LEVEL: u32 = 1;

    /// 最大压缩级别
    pub const MAX_COMPRESSION_LEVEL: u32 = 9;

    /// 备份存储目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 备份名称前缀
    pub const BACKUP_PREFIX: &str = "backup_";

    /// 获取默认备份存储目录（用于配置）
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 恢复相关默认值
pub mod restore {
    /// 每批插入的记录数
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    /// 单条 SQL 语句允许绑定的最大参数个数（SQLite 默认上限 32766）
    pub const MAX_BOUND_PARAMETERS: usize = 32_000;
}

/// 配置文件相关常量
pub mod config {
    use std::path::{Path, PathBuf};

    /// 按优先级查找的配置文件
    pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["vault.toml", ".vault.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "vault.toml";

    /// 目录库文件名
    pub const CATALOG_FILE_NAME: &str = "catalog.duckdb";

    /// 获取默认目录库路径
    pub fn get_default_catalog_path() -> PathBuf {
        Path::new(".").join("data").join(CATALOG_FILE_NAME)
    }

    /// 获取默认媒体根目录
    pub fn get_default_media_root() -> PathBuf {
        Path::new(".").join("media")
    }
}

/// 调度相关常量
pub mod scheduler {
    /// 默认调度检查间隔（秒）
    pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
}

/// HTTP 服务相关常量
pub mod server {
    /// 默认监听地址
    pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

    /// 列表接口默认每页条数
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    /// 列表接口最大每页条数
    pub const MAX_PAGE_SIZE: u32 = 200;
}
