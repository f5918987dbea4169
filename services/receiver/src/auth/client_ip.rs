//! 客户端 IP 解析与白名单匹配。

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// 无法确定来源时使用的占位值。
pub(crate) const UNKNOWN_CLIENT_IP: &str = "unknown";

/// 解析客户端 IP：`X-Forwarded-For` 首项 > `X-Real-IP` > 套接字地址（去端口）。
pub(crate) fn resolve_client_ip(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    trust_forwarded: bool,
) -> String {
    if trust_forwarded {
        if let Some(first) = header_str(headers, "x-forwarded-for")
            .and_then(|raw| raw.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return first.to_string();
        }
        if let Some(real) = header_str(headers, "x-real-ip")
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return real.to_string();
        }
    }
    remote
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
}

/// 白名单为空表示不限制；`*` 匹配任意来源。
pub(crate) fn ip_allowed(allowed: &[String], client_ip: &str) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|entry| entry == "*" || entry == client_ip)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
