//! HTTP 路由处理函数。

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
};
use dr_shared_protocol::{
    AUTH_SCHEME, HealthResponse, SERVICE_NAME, ServiceInfo, UploadResponse,
};

use super::pipeline::ingest;
use crate::{api::error::ApiError, state::AppState};

/// 服务信息接口。
pub(crate) async fn root_handler(State(state): State<AppState>) -> Json<ServiceInfo> {
    let settings = state.settings().await;
    Json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        security: settings.security.enabled,
        auth: AUTH_SCHEME.to_string(),
        paths: settings.path_keys(),
    })
}

/// 健康检查接口。
pub(crate) async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// 上传接口：`POST /upload/{path_key}/{relative_path}[?extract=true]`。
pub(crate) async fn upload_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<UploadResponse>, ApiError> {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    ingest(&state, request, remote).await.map(Json)
}
