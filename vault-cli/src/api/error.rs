use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use vault_core::VaultError;

/// HTTP 层的错误包装，把引擎错误映射为状态码和 `{code, message}` 响应体
#[derive(Debug)]
pub struct ApiError(pub VaultError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(VaultError::invalid_state(message))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VaultError::RestoreInProgress(_) => StatusCode::CONFLICT,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::ArchiveCorrupt(_) | VaultError::UnsupportedSchemaVersion { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            VaultError::InvalidState(_)
            | VaultError::InvalidConfig(_)
            | VaultError::Schema(_)
            | VaultError::Uuid(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "请求处理失败");
        }

        let body = Json(json!({
            "code": self.0.code(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
