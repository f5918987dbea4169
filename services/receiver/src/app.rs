//! Receiver 应用装配：路由、CORS、监听、信号处理。

use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::Settings,
    state::AppState,
    upload::handlers::{health_handler, root_handler, upload_handler},
};

/// 组装路由。上传体积由流水线自行限长，这里关闭 axum 默认上限。
pub(crate) fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/upload/{*rest}", post(upload_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Receiver 入口：监听端口直到收到退出信号。
pub(crate) async fn run(settings: Settings, config_path: PathBuf) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let security = settings.security.enabled;
    let state = AppState::new(settings, Some(config_path));
    spawn_reload_listener(state.clone());

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        "deploy receiver listening on {addr} (security: {})",
        if security { "enabled" } else { "disabled" }
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serve")?;

    info!("receiver stopped; {}", state.counters().await.summary());
    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("listen for ctrl-c failed: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("listen for SIGTERM failed: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// SIGHUP 触发配置重载；失败时保留旧配置。
#[cfg(unix)]
fn spawn_reload_listener(state: AppState) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(err) => {
            warn!("listen for SIGHUP failed: {err}");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            if let Err(err) = state.reload().await {
                warn!("config reload failed, keeping previous settings: {err:#}");
            }
            info!("{}", state.counters().await.summary());
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_listener(_state: AppState) {}
