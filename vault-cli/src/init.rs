use std::path::Path;
use tracing::{info, warn};
use vault_core::Result;
use vault_core::config::AppConfig;
use vault_core::constants::config::DEFAULT_CONFIG_FILE;

/// 创建默认配置文件和存储目录，不需要预先加载配置
pub async fn run_init(force: bool, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    info!("🗄️ Vault 初始化");
    info!("======================");

    if path.exists() && !force {
        warn!("⚠️  配置文件已存在: {}", path.display());
        info!("如果您要重新初始化，请使用 --force 参数");
        info!("示例: vault-cli init --force");
        return Ok(());
    }

    let config = AppConfig::default();
    config.save_to_file(path)?;
    info!("   ✅ 创建配置文件: {}", path.display());

    config.ensure_dirs()?;
    std::fs::create_dir_all(&config.media.root)?;
    info!("   ✅ 创建目录结构:");
    info!("      - {}  (备份存储目录)", config.storage.root);
    info!("      - {}  (目录库)", config.catalog.path);
    info!("      - {}  (媒体目录)", config.media.root);

    info!("🎉 初始化完成！");
    info!("📝 接下来的步骤:");
    info!("   1️⃣  编辑 {}，在 [database] 中填写线上数据库", path.display());
    info!("   2️⃣  在 [[collections]] 中声明需要备份的集合和字段");
    info!("   3️⃣  运行 'vault-cli create-backup' 创建第一个备份");
    Ok(())
}
