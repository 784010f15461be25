use crate::app::CliApp;
use crate::utils::{confirm, format_size};
use chrono::Utc;
use tracing::{info, warn};
use vault_core::{Result, VaultError};

/// 删除超过保留期的备份
pub async fn run_cleanup(
    app: &CliApp,
    retention_days: Option<u32>,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let retention_days = retention_days
        .or(app.engine.config().scheduler.retention_days)
        .ok_or_else(|| {
            VaultError::invalid_config("请通过 --retention-days 或 scheduler.retention_days 指定保留天数")
        })?;

    info!("🧹 清理 {} 天前的备份{}", retention_days, if dry_run { " (预览)" } else { "" });

    // 先预览，确认后再真正删除
    let now = Utc::now();
    let preview = app.engine.cleanup(retention_days, true, now).await?;
    for skipped in &preview.skipped {
        warn!("   ⏭️  跳过 {} ({}): {}", skipped.name, skipped.backup_id, skipped.reason);
    }
    if preview.deleted.is_empty() {
        info!("没有需要清理的备份");
        return Ok(());
    }

    let total: u64 = preview
        .deleted
        .iter()
        .filter_map(|b| b.archive_size_bytes)
        .sum();
    for backup in &preview.deleted {
        info!(
            "   - {} {} ({})",
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.name,
            backup.id
        );
    }
    info!("共 {} 个备份, {}", preview.deleted.len(), format_size(total));

    if dry_run {
        info!("💡 去掉 --dry-run 参数即可执行删除");
        return Ok(());
    }
    if !force && !confirm("确认删除以上备份?")? {
        warn!("操作已取消");
        return Ok(());
    }

    let report = app.engine.cleanup(retention_days, false, now).await?;
    for skipped in &report.skipped {
        warn!("   ⚠️  未删除 {} ({}): {}", skipped.name, skipped.backup_id, skipped.reason);
    }
    info!("✅ 已删除 {} 个备份", report.deleted.len());
    Ok(())
}
