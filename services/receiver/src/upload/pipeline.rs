//! 上传处理流水线：验签 → 路由解析 → 路径校验 → 限长读取 → 落盘 → 可选解压。
//!
//! 落盘之前的任何失败都不会在磁盘上留下痕迹。

use std::{
    borrow::Cow,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, header::CONTENT_LENGTH},
};
use dr_shared_protocol::{UPLOAD_ROUTE_PREFIX, UploadResponse, now_unix};
use futures_util::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    extract::extract_zip,
    path::{PathRejection, UploadTarget, confine_physically, resolve},
};
use crate::{
    api::error::ApiError,
    auth::{
        client_ip::resolve_client_ip,
        verify::{AuthRejection, RequestCredentials, Verified, verify_request},
    },
    config::Settings,
    state::AppState,
};

/// 处理一次上传请求。
pub(crate) async fn ingest(
    state: &AppState,
    request: Request,
    remote: Option<SocketAddr>,
) -> Result<UploadResponse, ApiError> {
    let settings = state.settings().await;
    let (parts, body) = request.into_parts();
    let client_ip = resolve_client_ip(
        &parts.headers,
        remote,
        settings.security.trust_forwarded_headers,
    );

    let raw_path = parts.uri.path();
    let url_path = urlencoding::decode(raw_path)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw_path.to_string());

    authenticate(state, &settings, &parts.headers, &client_ip, &url_path).await?;

    let (path_key, relative) = split_upload_route(&url_path).ok_or_else(|| {
        warn!("rejected upload from {client_ip}: bad route {url_path}");
        ApiError::bad_route()
    })?;
    let target = resolve(&settings.paths, path_key, relative).map_err(|err| {
        warn!("rejected upload from {client_ip}: {err}");
        ApiError::from(err)
    })?;

    let limit = settings.max_upload_bytes;
    if declared_length(&parts.headers).is_some_and(|declared| declared > limit) {
        warn!(
            "rejected upload from {client_ip}: declared length exceeds {} MB",
            settings.max_upload_mb
        );
        return Err(ApiError::payload_too_large(settings.max_upload_mb));
    }
    let bytes = read_body_limited(body, limit)
        .await
        .map_err(|err| match err {
            BodyError::TooLarge => {
                warn!(
                    "rejected upload from {client_ip}: body exceeds {} MB",
                    settings.max_upload_mb
                );
                ApiError::payload_too_large(settings.max_upload_mb)
            }
            BodyError::Read(message) => {
                warn!("upload body read failed from {client_ip}: {message}");
                ApiError::io("BODY_READ_FAILED", format!("读取请求体失败: {message}"))
            }
        })?;

    persist(&target, &bytes).await?;
    let size = bytes.len() as u64;
    drop(bytes);
    info!(
        "upload accepted from {client_ip}: {}/{} ({size} bytes)",
        target.path_key, target.relative
    );

    let mut extracted = false;
    let mut extract_dir = None;
    if wants_extract(parts.uri.query()) && is_zip(&target.relative) {
        let dest = extract_destination(&target.full_path);
        match run_extraction(&target, &dest).await {
            Ok(count) => {
                info!("extracted {count} files to {}", dest.display());
                extracted = true;
                extract_dir = Some(dest.display().to_string());
            }
            Err(message) => {
                warn!(
                    "extraction of {} failed: {message}",
                    target.full_path.display()
                );
            }
        }
    }

    state.record_upload(size, now_unix()).await;

    Ok(UploadResponse {
        status: "ok".to_string(),
        path: target.full_path.display().to_string(),
        size,
        path_key: target.path_key,
        filename: target.relative,
        extracted,
        extract_dir,
    })
}

/// 验签与可选防重放；失败时计数并返回统一 401。
async fn authenticate(
    state: &AppState,
    settings: &Settings,
    headers: &HeaderMap,
    client_ip: &str,
    url_path: &str,
) -> Result<(), ApiError> {
    let credentials = RequestCredentials::from_headers(headers);
    let now = now_unix();
    let outcome = match verify_request(&settings.security, &credentials, client_ip, url_path, now)
    {
        Ok(Verified::Signed { timestamp, nonce }) if settings.security.replay_cache => {
            let expires_at = timestamp.saturating_add(settings.security.timestamp_limit as i64);
            if state
                .consume_nonce(timestamp, &nonce, expires_at, now)
                .await
            {
                Ok(())
            } else {
                Err(AuthRejection::Replayed)
            }
        }
        Ok(_) => Ok(()),
        Err(rejection) => Err(rejection),
    };

    if let Err(rejection) = outcome {
        warn!("auth rejected from {client_ip} for {url_path}: {rejection}");
        state.record_failed_auth().await;
        return Err(ApiError::unauthorized());
    }
    Ok(())
}

/// 拆分 `/upload/{key}/{path}`，两段都必须非空。
pub(crate) fn split_upload_route(url_path: &str) -> Option<(&str, &str)> {
    let rest = url_path.strip_prefix(UPLOAD_ROUTE_PREFIX)?;
    let (key, relative) = rest.split_once('/')?;
    if key.is_empty() || relative.is_empty() {
        return None;
    }
    Some((key, relative))
}

/// query 中是否带 `extract=true`。
pub(crate) fn wants_extract(query: Option<&str>) -> bool {
    query.is_some_and(|raw| {
        url::form_urlencoded::parse(raw.as_bytes())
            .any(|(key, value)| key == "extract" && value == "true")
    })
}

/// 文件名是否以 `.zip` 结尾（大小写不敏感）。
pub(crate) fn is_zip(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".zip")
}

/// 解压目录：去掉扩展名的同级路径。
pub(crate) fn extract_destination(archive: &Path) -> PathBuf {
    archive.with_extension("")
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
}

#[derive(Debug)]
enum BodyError {
    TooLarge,
    Read(String),
}

/// 流式读取请求体，超过 `limit` 立即停止。
async fn read_body_limited(body: Body, limit: u64) -> Result<Vec<u8>, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| BodyError::Read(err.to_string()))?;
        if buf.len() as u64 + chunk.len() as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// 写入同目录下的隐藏暂存文件，再原子替换目标。
async fn persist(target: &UploadTarget, bytes: &[u8]) -> Result<(), ApiError> {
    let inside = confine_physically(&target.base_dir, &target.full_path)
        .await
        .map_err(|err| ApiError::io("PATH_CHECK_FAILED", format!("路径检查失败: {err}")))?;
    if !inside {
        warn!(
            "rejected upload: {} resolves outside {}",
            target.full_path.display(),
            target.base_dir.display()
        );
        return Err(PathRejection::PathEscape.into());
    }

    let Some(parent) = target.full_path.parent() else {
        return Err(PathRejection::PathEscape.into());
    };
    tokio::fs::create_dir_all(parent).await.map_err(|err| {
        ApiError::io("CREATE_DIR_FAILED", format!("创建目录失败: {err}"))
    })?;

    let staging = staging_path(&target.full_path);
    if let Err(err) = tokio::fs::write(&staging, bytes).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(ApiError::io("WRITE_FAILED", format!("写入文件失败: {err}")));
    }
    if let Err(err) = tokio::fs::rename(&staging, &target.full_path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(ApiError::io("RENAME_FAILED", format!("保存文件失败: {err}")));
    }
    Ok(())
}

/// `.<uuid>.part`，与目标同目录；名字定长，不受目标文件名长度影响。
fn staging_path(target: &Path) -> PathBuf {
    target.with_file_name(format!(".{}.part", Uuid::new_v4().simple()))
}

async fn run_extraction(target: &UploadTarget, dest: &Path) -> Result<usize, String> {
    let inside = confine_physically(&target.base_dir, dest)
        .await
        .map_err(|err| err.to_string())?;
    if !inside {
        return Err(format!("{} resolves outside base", dest.display()));
    }
    let archive = target.full_path.clone();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip(&archive, &dest))
        .await
        .map_err(|err| format!("extraction task failed: {err}"))?
        .map_err(|err| err.to_string())
}
