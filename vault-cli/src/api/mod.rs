//! HTTP 接口
//!
//! 所有请求共享同一个 [`VaultEngine`]，长时间运行的备份和恢复在后台执行，
//! 接口立即返回任务 ID，调用方通过 `GET /backups/{id}`、`GET /restores/{id}`
//! 或 `GET /jobs/{id}` 轮询进度。

mod error;
mod handlers;


pub use error::{ApiError, ApiResult};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use vault_core::{Result, VaultEngine, VaultError};

/// 构建路由
pub fn router(engine: Arc<VaultEngine>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/backups",
            post(handlers::create_backup).get(handlers::list_backups),
        )
        .route(
            "/backups/{id}",
            get(handlers::get_backup).delete(handlers::delete_backup),
        )
        .route("/backups/{id}/restore", post(handlers::restore_backup))
        .route("/backups/{id}/download", get(handlers::download_backup))
        .route("/restores", get(handlers::list_restores))
        .route("/restores/{id}", get(handlers::get_restore))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route(
            "/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// 绑定地址并提供服务，直到进程退出或收到 Ctrl-C
pub async fn serve(engine: Arc<VaultEngine>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| VaultError::invalid_config(format!("无法监听 {bind}: {e}")))?;
    info!("HTTP 服务已启动: {}", listener.local_addr()?);

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到退出信号，正在停止 HTTP 服务");
        })
        .await?;
    Ok(())
}
