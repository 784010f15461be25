use crate::app::CliApp;
use chrono::Utc;
use tracing::info;
use vault_core::{BackupKind, Cadence, Result};

pub async fn add_schedule(app: &CliApp, name: &str, cadence: Cadence, kind: BackupKind) -> Result<()> {
    let schedule = app.engine.create_schedule(name, cadence, kind).await?;
    info!(
        "✅ 已添加备份计划 #{}: {} ({}, {})",
        schedule.id, schedule.name, schedule.cadence.as_str(), schedule.kind
    );
    info!("💡 计划由 'vault-cli tick' 或 'vault-cli serve' 触发");
    Ok(())
}

pub async fn list_schedules(app: &CliApp) -> Result<()> {
    let schedules = app.engine.list_schedules().await?;
    if schedules.is_empty() {
        info!("暂无备份计划");
        info!("💡 使用 'vault-cli schedule add <名称> --cadence daily' 添加");
        return Ok(());
    }

    let now = Utc::now();
    info!(
        "{:<6} {:<20} {:<8} {:<10} {:<6} {:<20} {}",
        "ID", "名称", "周期", "类型", "启用", "上次运行", "下次运行"
    );
    info!("{}", "-".repeat(100));
    for schedule in &schedules {
        let last = schedule
            .last_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "从未".to_string());
        let next = match schedule.last_run_at {
            _ if !schedule.is_active => "---".to_string(),
            Some(last) => schedule
                .cadence
                .next_after(last)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => "下次检查时".to_string(),
        };
        info!(
            "{:<6} {:<20} {:<8} {:<10} {:<6} {:<20} {}{}",
            schedule.id,
            schedule.name,
            schedule.cadence.as_str(),
            schedule.kind.as_str(),
            if schedule.is_active { "是" } else { "否" },
            last,
            next,
            if schedule.is_due(now) { " (已到期)" } else { "" }
        );
    }
    Ok(())
}

pub async fn set_schedule_active(app: &CliApp, id: i64, active: bool) -> Result<()> {
    app.engine.set_schedule_active(id, active).await?;
    info!("✅ 备份计划 #{} 已{}", id, if active { "启用" } else { "暂停" });
    Ok(())
}

pub async fn remove_schedule(app: &CliApp, id: i64) -> Result<()> {
    app.engine.delete_schedule(id).await?;
    info!("🗑️ 已删除备份计划 #{}", id);
    Ok(())
}

/// 执行一次计划检查并等待触发的备份完成
pub async fn run_tick(app: &CliApp) -> Result<()> {
    let triggered = app.engine.tick(Utc::now()).await?;
    if triggered.is_empty() {
        info!("没有到期的备份计划");
        return Ok(());
    }

    let mut failures = 0;
    for job in &triggered {
        info!("⏰ 计划 {} 触发备份 {}", job.schedule_name, job.backup_id);
        let finished = app.engine.wait_for(job.backup_id).await?;
        match finished.error {
            None => info!("   ✅ 备份 {} 完成", job.backup_id),
            Some(e) => {
                failures += 1;
                tracing::error!("   ❌ 备份 {} 失败: {}", job.backup_id, e);
            }
        }
    }

    if failures > 0 {
        return Err(vault_core::VaultError::custom(format!(
            "{failures} 个计划备份失败"
        )));
    }
    Ok(())
}
