use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;
use vault_core::{BackupKind, Cadence};

/// 备份类型参数
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    /// 只备份数据库集合
    Database,
    /// 只备份媒体文件
    Media,
    /// 数据库和媒体文件
    Full,
}

impl From<KindArg> for BackupKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Database => BackupKind::Database,
            KindArg::Media => BackupKind::Media,
            KindArg::Full => BackupKind::Full,
        }
    }
}

/// 计划周期参数
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CadenceArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<CadenceArg> for Cadence {
    fn from(cadence: CadenceArg) -> Self {
        match cadence {
            CadenceArg::Daily => Cadence::Daily,
            CadenceArg::Weekly => Cadence::Weekly,
            CadenceArg::Monthly => Cadence::Monthly,
        }
    }
}

/// 备份计划相关命令
#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// 添加备份计划
    Add {
        /// 计划名称，也用作自动备份名称的前缀
        name: String,
        #[arg(long, value_enum, default_value = "daily")]
        cadence: CadenceArg,
        #[arg(long, value_enum, default_value = "full")]
        kind: KindArg,
    },
    /// 列出所有备份计划
    List,
    /// 启用备份计划
    Enable { id: i64 },
    /// 暂停备份计划
    Disable { id: i64 },
    /// 删除备份计划
    Remove { id: i64 },
}

/// Vault - 数据集与媒体文件的备份恢复工具
#[derive(Parser, Debug)]
#[command(name = "vault-cli")]
#[command(about = "数据集与媒体文件的备份恢复工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径（默认依次查找 vault.toml、.vault.toml）
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 创建配置文件和存储目录
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 创建备份并等待完成
    CreateBackup {
        #[arg(long, value_enum, default_value = "full")]
        kind: KindArg,
        /// 备份名称（不指定时自动生成）
        #[arg(long)]
        name: Option<String>,
    },
    /// 从备份恢复线上数据
    RestoreBackup {
        /// 备份 ID
        backup_id: Uuid,
        /// 跳过确认提示
        #[arg(long)]
        force: bool,
        /// 快速模式：跳过预备份和深度校验
        #[arg(long)]
        quick: bool,
        /// 不校验归档
        #[arg(long)]
        no_verify: bool,
        /// 恢复前不创建安全备份
        #[arg(long)]
        no_pre_backup: bool,
        /// 不恢复媒体文件
        #[arg(long)]
        no_media: bool,
        /// 只恢复指定集合（可重复）
        #[arg(long = "collection")]
        collections: Vec<String>,
    },
    /// 删除超过保留期的备份
    CleanupBackups {
        /// 保留天数（不指定时使用配置中的 scheduler.retention_days）
        #[arg(long)]
        retention_days: Option<u32>,
        /// 只列出将被删除的备份
        #[arg(long)]
        dry_run: bool,
        /// 跳过确认提示
        #[arg(long)]
        force: bool,
    },
    /// 列出备份
    ListBackups {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// 显示备份详情
    ShowBackup { backup_id: Uuid },
    /// 删除备份及其归档文件
    DeleteBackup {
        backup_id: Uuid,
        /// 跳过确认提示
        #[arg(long)]
        force: bool,
    },
    /// 列出恢复记录
    ListRestores {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// 备份计划管理
    #[command(subcommand)]
    Schedule(ScheduleCommand),
    /// 执行一次计划检查，触发到期的备份
    Tick,
    /// 启动 HTTP 服务（同时按配置的间隔执行计划检查）
    Serve {
        /// 监听地址，覆盖配置中的 server.bind
        #[arg(long)]
        bind: Option<String>,
    },
}
