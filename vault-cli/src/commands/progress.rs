use crate::app::CliApp;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use uuid::Uuid;
use vault_core::{ProgressSnapshot, Result, VaultError};

fn progress_bar() -> Result<ProgressBar> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .map_err(|e| VaultError::custom(format!("进度条模板无效: {e}")))?
            .progress_chars("#>-"),
    );
    Ok(bar)
}

/// 在终端显示任务进度直到结束
///
/// 第一次 Ctrl-C 请求取消任务，任务在下一个集合边界停止。
pub async fn follow_job(app: &CliApp, job_id: Uuid) -> Result<ProgressSnapshot> {
    let mut receiver = app
        .engine
        .subscribe(job_id)
        .ok_or_else(|| VaultError::not_found(format!("任务 {job_id}")))?;
    let bar = progress_bar()?;
    let mut cancel_requested = false;

    loop {
        let snapshot = receiver.borrow_and_update().clone();
        bar.set_position(u64::from(snapshot.percent));
        bar.set_message(snapshot.label.clone());
        if snapshot.status.is_terminal() {
            bar.finish_and_clear();
            return Ok(snapshot);
        }

        tokio::select! {
            changed = receiver.changed() => {
                if changed.is_err() {
                    bar.finish_and_clear();
                    return Ok(receiver.borrow().clone());
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                bar.suspend(|| warn!("⏹️  收到中断信号，正在取消任务（在下一个集合边界生效）..."));
                if let Err(e) = app.engine.cancel(job_id) {
                    warn!("取消任务失败: {}", e);
                }
            }
        }
    }
}
