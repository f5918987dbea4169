//! API 错误定义与响应转换。

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dr_shared_protocol::ErrorResponse;

use crate::upload::path::PathRejection;

/// 认证失败的统一对外描述，具体原因只写日志。
pub(crate) const UNAUTHORIZED_MESSAGE: &str = "认证失败";

/// 上传接口错误。
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl ApiError {
    /// 构造统一 API 错误。
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 验签失败（401）。
    pub(crate) fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            UNAUTHORIZED_MESSAGE,
        )
    }

    /// 路由形态错误（400）。
    pub(crate) fn bad_route() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "BAD_ROUTE",
            "URL格式错误，应为: /upload/{path_key}/{filename}",
        )
    }

    /// 超过上传上限（413）。
    pub(crate) fn payload_too_large(limit_mb: u64) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            format!("文件超过上传上限 {limit_mb} MB"),
        )
    }

    /// 服务端 I/O 失败（500）。
    pub(crate) fn io(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl From<PathRejection> for ApiError {
    fn from(err: PathRejection) -> Self {
        let code = match &err {
            PathRejection::UnknownPathKey(_) => "UNKNOWN_PATH_KEY",
            PathRejection::InvalidFilename(_) => "INVALID_FILENAME",
            PathRejection::PathEscape => "PATH_ESCAPE",
        };
        Self::new(StatusCode::BAD_REQUEST, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                status: "error".to_string(),
                code: self.code.to_string(),
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::{ApiError, UNAUTHORIZED_MESSAGE};
    use crate::upload::path::PathRejection;

    #[test]
    fn path_rejections_map_to_bad_request() {
        for (rejection, code) in [
            (
                PathRejection::UnknownPathKey("nope".to_string()),
                "UNKNOWN_PATH_KEY",
            ),
            (
                PathRejection::InvalidFilename("../x".to_string()),
                "INVALID_FILENAME",
            ),
            (PathRejection::PathEscape, "PATH_ESCAPE"),
        ] {
            let err = ApiError::from(rejection);
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.code, code);
        }
    }

    #[tokio::test]
    async fn unauthorized_body_is_generic() {
        let response = ApiError::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["status"], "error");
        assert_eq!(body["code"], "UNAUTHORIZED");
        assert_eq!(body["error"], UNAUTHORIZED_MESSAGE);
    }
}
