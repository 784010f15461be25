use crate::api;
use crate::app::CliApp;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};
use vault_core::Result;

/// 启动 HTTP 服务，同时在后台定时检查备份计划
pub async fn run_serve(app: &CliApp, bind: Option<String>) -> Result<()> {
    let config = app.engine.config();
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let interval_secs = config.scheduler.tick_interval_secs.max(1);

    let engine = app.engine.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match engine.tick(Utc::now()).await {
                Ok(triggered) => {
                    for job in triggered {
                        info!("⏰ 计划 {} 触发备份 {}", job.schedule_name, job.backup_id);
                    }
                }
                Err(e) => warn!("计划检查失败: {}", e),
            }
        }
    });

    info!("🚀 HTTP 服务监听于 http://{}", bind);
    info!("   计划检查间隔: {} 秒", interval_secs);
    let result = api::serve(app.engine.clone(), &bind).await;
    ticker.abort();
    result
}
