use super::error::{ApiError, ApiResult};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;
use vault_core::{
    Backup, BackupKind, BackupSchedule, Cadence, JobStatus, Page, ProgressSnapshot, RestoreOptions,
    RestoreRecord, VaultEngine, VaultError, constants::server,
};

pub type AppState = Arc<VaultEngine>;

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl Pagination {
    fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(server::DEFAULT_PAGE_SIZE)
            .clamp(1, server::MAX_PAGE_SIZE);
        (page, per_page)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CreateBackupRequest {
    pub kind: BackupKind,
    pub name: Option<String>,
}

impl Default for CreateBackupRequest {
    fn default() -> Self {
        Self {
            kind: BackupKind::Full,
            name: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BackupCreated {
    pub backup_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct RestoreCreated {
    pub restore_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub name: String,
    pub cadence: Cadence,
    #[serde(default = "default_schedule_kind")]
    pub kind: BackupKind,
}

fn default_schedule_kind() -> BackupKind {
    BackupKind::Full
}

/// 空请求体按默认值处理
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("请求体不是有效的 JSON: {e}")))
}

// ========== 备份 ==========

pub async fn create_backup(
    State(engine): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BackupCreated>)> {
    let request: CreateBackupRequest = parse_body(&body)?;
    let backup = engine.start_backup(request.kind, request.name, "api").await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(BackupCreated {
            backup_id: backup.id,
            status: backup.status,
        }),
    ))
}

pub async fn list_backups(
    State(engine): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<Backup>>> {
    let (page, per_page) = pagination.resolve();
    Ok(Json(engine.list_backups(page, per_page).await?))
}

pub async fn get_backup(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Backup>> {
    Ok(Json(engine.get_backup(id).await?))
}

pub async fn delete_backup(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    engine.delete_backup(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 以流的方式返回归档文件
pub async fn download_backup(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let backup = engine.archive_for_download(id).await?;
    let path = backup
        .archive_path
        .ok_or_else(|| VaultError::not_found(format!("备份 {id} 的归档文件")))?;
    let file = tokio::fs::File::open(&path).await.map_err(VaultError::from)?;
    let length = file.metadata().await.map_err(VaultError::from)?.len();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{id}.tar.gz"));

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/gzip")
        .header(CONTENT_LENGTH, length)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError(VaultError::custom(format!("构造下载响应失败: {e}"))))
}

// ========== 恢复 ==========

pub async fn restore_backup(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<RestoreCreated>)> {
    let options: RestoreOptions = parse_body(&body)?;
    let record = engine.start_restore(id, options).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RestoreCreated {
            restore_id: record.id,
            status: record.status,
        }),
    ))
}

pub async fn list_restores(
    State(engine): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<RestoreRecord>>> {
    let (page, per_page) = pagination.resolve();
    Ok(Json(engine.list_restores(page, per_page).await?))
}

pub async fn get_restore(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RestoreRecord>> {
    Ok(Json(engine.get_restore(id).await?))
}

// ========== 任务 ==========

pub async fn get_job(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProgressSnapshot>> {
    engine
        .job_progress(id)
        .map(Json)
        .ok_or_else(|| ApiError(VaultError::not_found(format!("任务 {id}"))))
}

pub async fn cancel_job(
    State(engine): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    engine.cancel(id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": id, "cancel_requested": true })),
    ))
}

// ========== 计划 ==========

pub async fn list_schedules(
    State(engine): State<AppState>,
) -> ApiResult<Json<Vec<BackupSchedule>>> {
    Ok(Json(engine.list_schedules().await?))
}

pub async fn create_schedule(
    State(engine): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<BackupSchedule>)> {
    let request: CreateScheduleRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("请求体不是有效的 JSON: {e}")))?;
    let schedule = engine
        .create_schedule(&request.name, request.cadence, request.kind)
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn health(State(engine): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "restore_running": engine.is_restore_running(),
    }))
}
