//! 上传请求验签：白名单 → 认证头 → 时间窗 → Ed25519 签名。
//!
//! 纯函数，不做 I/O；防重放缓存由调用方在验签通过后消费。

use axum::http::HeaderMap;
use dr_shared_protocol::{
    HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP, SignatureError, canonical_message,
    verify_signature,
};
use thiserror::Error;

use crate::{auth::client_ip::ip_allowed, config::SecuritySettings};

/// 验签拒绝原因，仅用于日志；响应统一为 401。
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum AuthRejection {
    #[error("IP不在白名单: {0}")]
    IpNotAllowed(String),
    #[error("缺少认证头 (X-Timestamp, X-Signature)")]
    MissingHeaders,
    #[error("无效的时间戳格式")]
    BadTimestamp,
    #[error("时间戳已过期 (差异: {diff}秒, 限制: {limit}秒)")]
    Expired { diff: u64, limit: u64 },
    #[error("{0}")]
    BadSignature(SignatureError),
    #[error("服务端未配置公钥")]
    MissingPublicKey,
    #[error("签名请求重复")]
    Replayed,
}

/// 请求携带的签名头。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RequestCredentials {
    pub(crate) timestamp: Option<String>,
    pub(crate) nonce: Option<String>,
    pub(crate) signature: Option<String>,
}

impl RequestCredentials {
    /// 从请求头提取；非 UTF-8 或空值视为缺失。
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        };
        Self {
            timestamp: read(HEADER_TIMESTAMP),
            nonce: read(HEADER_NONCE),
            signature: read(HEADER_SIGNATURE),
        }
    }
}

/// 验签结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verified {
    /// 安全认证已关闭。
    Disabled,
    /// 签名有效，附带可用于防重放的时间戳与 nonce。
    Signed { timestamp: i64, nonce: String },
}

/// 校验一次上传请求。
///
/// `url_path` 必须是已解码的请求路径，不含 query。
pub(crate) fn verify_request(
    security: &SecuritySettings,
    credentials: &RequestCredentials,
    client_ip: &str,
    url_path: &str,
    now: i64,
) -> Result<Verified, AuthRejection> {
    if !security.enabled {
        return Ok(Verified::Disabled);
    }

    if !ip_allowed(&security.allowed_ips, client_ip) {
        return Err(AuthRejection::IpNotAllowed(client_ip.to_string()));
    }

    let (Some(timestamp_raw), Some(signature)) =
        (credentials.timestamp.as_deref(), credentials.signature.as_deref())
    else {
        return Err(AuthRejection::MissingHeaders);
    };
    let nonce = credentials.nonce.as_deref().unwrap_or("");

    let timestamp = timestamp_raw
        .parse::<i64>()
        .map_err(|_| AuthRejection::BadTimestamp)?;
    let diff = now.abs_diff(timestamp);
    if diff > security.timestamp_limit {
        return Err(AuthRejection::Expired {
            diff,
            limit: security.timestamp_limit,
        });
    }

    let Some(public_key) = security.public_key.as_ref() else {
        return Err(AuthRejection::MissingPublicKey);
    };
    let message = canonical_message(timestamp_raw, nonce, url_path);
    verify_signature(public_key, &message, signature).map_err(AuthRejection::BadSignature)?;

    Ok(Verified::Signed {
        timestamp,
        nonce: nonce.to_string(),
    })
}
