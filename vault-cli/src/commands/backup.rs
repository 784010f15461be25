use crate::app::CliApp;
use crate::commands::progress::follow_job;
use crate::utils::{confirm, format_size};
use tracing::{error, info, warn};
use uuid::Uuid;
use vault_core::{Backup, BackupKind, JobStatus, Result, VaultError};

/// 创建备份并显示进度
pub async fn run_create_backup(app: &CliApp, kind: BackupKind, name: Option<String>) -> Result<()> {
    info!("💾 创建备份");
    info!("===============");

    let backup = app.engine.start_backup(kind, name, "cli").await?;
    info!("任务 ID: {}", backup.id);
    info!("备份名称: {} (类型: {})", backup.name, backup.kind);

    let finished = follow_job(app, backup.id).await?;
    let backup = app.engine.get_backup(backup.id).await?;

    if finished.status == JobStatus::Completed {
        info!("✅ 备份完成");
        print_backup_details(&backup);
        Ok(())
    } else {
        let message = finished
            .error
            .or(backup.error_message)
            .unwrap_or_else(|| "未知错误".to_string());
        error!("❌ 备份失败: {}", message);
        info!("💡 工作目录已保留，可用于排查: {}", backup_work_dir(app, backup.id));
        Err(VaultError::custom(format!("备份 {} 失败: {message}", backup.id)))
    }
}

fn backup_work_dir(app: &CliApp, id: Uuid) -> String {
    app.engine
        .config()
        .get_storage_root()
        .join(id.to_string())
        .join(vault_core::constants::archive::WORK_DIR_NAME)
        .display()
        .to_string()
}

fn status_display(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "⏳ 等待中",
        JobStatus::InProgress => "🔄 进行中",
        JobStatus::Completed => "✅ 已完成",
        JobStatus::Failed => "❌ 失败",
    }
}

fn print_backup_details(backup: &Backup) {
    info!("   ID:       {}", backup.id);
    info!("   名称:     {}", backup.name);
    info!("   类型:     {}", backup.kind);
    info!("   状态:     {} ({}%)", status_display(backup.status), backup.progress_percent);
    info!("   创建者:   {}", backup.created_by);
    info!("   创建时间: {}", backup.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed_at) = backup.completed_at {
        info!("   结束时间: {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(path) = &backup.archive_path {
        info!("   归档文件: {}", path.display());
    }
    if let Some(size) = backup.archive_size_bytes {
        info!("   归档大小: {}", format_size(size));
    }
    if let Some(checksum) = &backup.checksum {
        info!("   SHA-256:  {}", checksum);
    }
    if !backup.current_operation.is_empty() && !backup.status.is_terminal() {
        info!("   当前步骤: {}", backup.current_operation);
    }
    if let Some(message) = &backup.error_message {
        warn!("   错误信息: {}", message);
    }
}

/// 分页列出备份
pub async fn run_list_backups(app: &CliApp, page: u32, per_page: u32) -> Result<()> {
    let result = app.engine.list_backups(page, per_page).await?;

    if result.items.is_empty() {
        info!("📦 暂无备份记录");
        info!("💡 使用以下命令创建备份:");
        info!("   vault-cli create-backup --kind full");
        return Ok(());
    }

    info!("📦 备份列表 (第 {} 页, 共 {} 个)", result.page, result.total);
    info!("============");
    info!(
        "{:<36} {:<10} {:<20} {:<12} {:<10} {}",
        "ID", "类型", "创建时间", "状态", "大小", "名称"
    );
    info!("{}", "-".repeat(110));

    let mut total_size = 0u64;
    for backup in &result.items {
        let size_display = match backup.archive_size_bytes {
            Some(size) => {
                total_size += size;
                format_size(size)
            }
            None => "---".to_string(),
        };
        info!(
            "{:<36} {:<10} {:<20} {:<12} {:<10} {}",
            backup.id.to_string(),
            backup.kind.as_str(),
            backup.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            status_display(backup.status),
            size_display,
            backup.name
        );

        if backup.status == JobStatus::Completed
            && !backup.archive_path.as_ref().is_some_and(|p| p.exists())
        {
            warn!("     ⚠️  警告: 归档文件不存在，无法用于恢复！");
        }
    }

    info!("{}", "-".repeat(110));
    info!("   本页总大小: {}", format_size(total_size));
    info!("💡 可用操作:");
    info!("   - 查看详情: vault-cli show-backup <备份ID>");
    info!("   - 从备份恢复: vault-cli restore-backup <备份ID>");
    Ok(())
}

pub async fn run_show_backup(app: &CliApp, backup_id: Uuid) -> Result<()> {
    let backup = app.engine.get_backup(backup_id).await?;
    info!("📦 备份详情");
    info!("============");
    print_backup_details(&backup);

    if let Some(progress) = app.engine.job_progress(backup_id) {
        if !progress.status.is_terminal() {
            info!("   实时进度: {}% {}", progress.percent, progress.label);
        }
    }
    Ok(())
}

pub async fn run_delete_backup(app: &CliApp, backup_id: Uuid, force: bool) -> Result<()> {
    let backup = app.engine.get_backup(backup_id).await?;
    if !force {
        warn!("⚠️  将删除备份 {} 及其归档文件，此操作不可恢复", backup.name);
        if !confirm(&format!("确认删除备份 {backup_id}?"))? {
            warn!("操作已取消");
            return Ok(());
        }
    }

    app.engine.delete_backup(backup_id).await?;
    info!("🗑️ 已删除备份: {} ({})", backup.name, backup_id);
    Ok(())
}
