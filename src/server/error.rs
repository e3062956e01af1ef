use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;
use serde_json::json;

use crate::error::{Error, ErrorKind};

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// API错误类型
#[derive(Debug)]
pub enum AppError {
    /// 索引与模型层的错误，按类别映射状态码
    Service(Error),
    /// 请求本身不合法
    BadRequest(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Service(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::ItemFailure => StatusCode::BAD_REQUEST,
                ErrorKind::NotReady => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Provider => StatusCode::BAD_GATEWAY,
                ErrorKind::Io | ErrorKind::Corrupt => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Service(e) => e.to_string(),
            Self::BadRequest(msg) => msg.clone(),
        };
        if status.is_server_error() {
            error!("请求处理失败: {message}");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self::Service(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_error_kind() {
        let cases = [
            (Error::InvalidImage("x".into()), StatusCode::BAD_REQUEST),
            (Error::DimensionMismatch { expected: 2, actual: 3 }, StatusCode::BAD_REQUEST),
            (Error::NotReady("索引尚未加载"), StatusCode::SERVICE_UNAVAILABLE),
            (Error::NotFound("a".into()), StatusCode::NOT_FOUND),
            (Error::Provider("timeout".into()), StatusCode::BAD_GATEWAY),
            (Error::CorruptState("digest".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
