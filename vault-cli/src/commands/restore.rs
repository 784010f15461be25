use crate::app::CliApp;
use crate::commands::progress::follow_job;
use crate::utils::confirm;
use tracing::{error, info, warn};
use uuid::Uuid;
use vault_core::{JobStatus, RestoreOptions, RestoreRecord, Result, VaultError};

/// 把命令行开关转换为恢复选项
pub fn restore_options(
    quick: bool,
    no_verify: bool,
    no_pre_backup: bool,
    no_media: bool,
    collections: Vec<String>,
) -> RestoreOptions {
    RestoreOptions {
        verify: !no_verify,
        pre_backup: !no_pre_backup,
        quick_mode: quick,
        restore_media: !no_media,
        collections: (!collections.is_empty()).then_some(collections),
    }
}

/// 从备份恢复，默认需要用户确认
pub async fn run_restore_backup(
    app: &CliApp,
    backup_id: Uuid,
    options: RestoreOptions,
    force: bool,
) -> Result<()> {
    let backup = app.engine.get_backup(backup_id).await?;

    if !force {
        warn!("⚠️  警告: 此操作将清空并覆盖线上数据库中的集合数据!");
        if options.restore_media {
            warn!("⚠️  媒体目录中的同名文件也会被覆盖");
        }
        if !options.wants_pre_backup() {
            warn!("⚠️  已关闭恢复前的安全备份，恢复后无法回退");
        }
        if !confirm(&format!("请确认您要从备份 {} ({}) 恢复", backup.name, backup_id))? {
            warn!("操作已取消");
            return Ok(());
        }
    }

    info!("开始恢复操作...");
    let record = app.engine.start_restore(backup_id, options).await?;
    info!("恢复任务 ID: {}", record.id);

    let finished = follow_job(app, record.id).await?;
    let record = app.engine.get_restore(record.id).await?;
    print_summary(&record);

    if finished.status == JobStatus::Completed {
        info!("✅ 恢复完成");
        Ok(())
    } else {
        let message = record
            .error_message
            .clone()
            .or(finished.error)
            .unwrap_or_else(|| "未知错误".to_string());
        error!("❌ 恢复失败: {}", message);
        Err(VaultError::custom(format!("恢复任务 {} 失败: {message}", record.id)))
    }
}

fn print_summary(record: &RestoreRecord) {
    let Some(summary) = &record.result_summary else {
        return;
    };

    info!("📊 恢复结果:");
    if let Some(mode) = &summary.integrity_mode {
        info!("   外键处理: {}", mode);
    }
    if summary.integrity_checks_enabled == Some(false) {
        warn!("   ⚠️ 恢复连接上的外键检查未能重新开启");
    }
    for outcome in &summary.collections {
        match outcome.actual {
            Some(actual) => info!(
                "   - {:<20} 期望 {:>8} 行, 插入 {:>8} 行, 核对 {:>8} 行",
                outcome.name, outcome.expected, outcome.inserted, actual
            ),
            None => info!(
                "   - {:<20} 期望 {:>8} 行, 插入 {:>8} 行",
                outcome.name, outcome.expected, outcome.inserted
            ),
        }
    }
    if summary.media_restored > 0 || !summary.media_skipped.is_empty() {
        info!(
            "   媒体文件: {} 个已还原, {} 个跳过",
            summary.media_restored,
            summary.media_skipped.len()
        );
        for skipped in &summary.media_skipped {
            warn!("     ⚠️  {}: {}", skipped.path, skipped.reason);
        }
    }
    if let Some(pre_backup) = summary.pre_backup_id {
        info!("   安全备份: {}", pre_backup);
    }
    for warning in &summary.warnings {
        warn!("   ⚠️  {}", warning);
    }
    for err in &summary.errors {
        error!("   ❌ {}", err);
    }
}

pub async fn run_list_restores(app: &CliApp, page: u32, per_page: u32) -> Result<()> {
    let result = app.engine.list_restores(page, per_page).await?;
    if result.items.is_empty() {
        info!("暂无恢复记录");
        return Ok(());
    }

    info!("♻️ 恢复记录 (第 {} 页, 共 {} 条)", result.page, result.total);
    info!(
        "{:<36} {:<36} {:<20} {:<12} {}",
        "ID", "备份 ID", "开始时间", "状态", "进度"
    );
    info!("{}", "-".repeat(120));
    for record in &result.items {
        info!(
            "{:<36} {:<36} {:<20} {:<12} {}%",
            record.id.to_string(),
            record.backup_id.to_string(),
            record.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            record.status.as_str(),
            record.progress_percent
        );
        if let Some(message) = &record.error_message {
            warn!("     错误: {}", message);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_options_from_flags() {
        let defaults = restore_options(false, false, false, false, vec![]);
        assert_eq!(defaults, RestoreOptions::default());

        let quick = restore_options(true, false, false, true, vec!["orders".to_string()]);
        assert!(quick.quick_mode);
        assert!(!quick.wants_pre_backup());
        assert!(!quick.wants_deep_verification());
        assert!(!quick.restore_media);
        assert_eq!(quick.collections, Some(vec!["orders".to_string()]));
    }
}
