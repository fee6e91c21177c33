use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{error_codes, error_to_api_response};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("无效或缺失的凭证")]
    Authentication,
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl AppError {
    pub fn room_not_found() -> Self {
        AppError::NotFound("聊天室不存在".into())
    }

    pub fn not_participant() -> Self {
        AppError::Forbidden("没有该聊天室的访问权限".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                error_codes::PERMISSION_DENIED,
                msg.clone(),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                error_codes::VALIDATION_ERROR,
                msg.clone(),
            ),
            AppError::Authentication => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                self.to_string(),
            ),
            // 不向客户端暴露内部错误细节
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                    "内部服务器错误".to_string(),
                )
            }
        };

        (status, error_to_api_response::<()>(code, msg)).into_response()
    }
}
