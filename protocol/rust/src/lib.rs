// 文件职责：
// 1) 定义 receiver/uploader 共用的线上数据结构与请求头名称。
// 2) 提供 Ed25519 密钥生成、签名消息拼装与签名校验。
// 3) 作为 Rust 侧协议唯一代码源，供 receiver 与 uploader 复用。

use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub mod keys;
pub mod sign;

pub use keys::{KeyError, KeyPair, public_from_private, public_key_from_hex, signing_key_from_hex};
pub use sign::{
    SignatureError, SignedHeaders, canonical_message, create_signed_headers,
    create_signed_headers_at, verify_signature,
};

/// 服务标识（`GET /` 返回）。
pub const SERVICE_NAME: &str = "Deploy Receiver";
/// 签名方案标识。
pub const AUTH_SCHEME: &str = "Ed25519";
/// 签名时间戳请求头。
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
/// 签名 nonce 请求头。
pub const HEADER_NONCE: &str = "X-Nonce";
/// 签名请求头。
pub const HEADER_SIGNATURE: &str = "X-Signature";
/// 上传路由前缀。
pub const UPLOAD_ROUTE_PREFIX: &str = "/upload/";

/// 上传成功响应体。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    // 固定为 `ok`。
    pub status: String,
    // 服务器端落盘的绝对路径。
    pub path: String,
    // 写入字节数。
    pub size: u64,
    // 路径标识。
    pub path_key: String,
    // 请求中的相对路径。
    pub filename: String,
    // 是否已解压。
    pub extracted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    // 解压目录，仅在解压成功时出现。
    pub extract_dir: Option<String>,
}

/// 失败响应体。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    // 固定为 `error`。
    pub status: String,
    // 机器可读错误码。
    pub code: String,
    // 面向调用方的错误描述。
    pub error: String,
}

/// 服务信息（`GET /`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub status: String,
    pub security: bool,
    pub auth: String,
    pub paths: Vec<String>,
}

/// 健康检查响应（`GET /health`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    /// 构造健康响应。
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// 当前 unix 秒。
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// 将 unix 秒格式化为本地时间（`YYYY-MM-DD HH:MM:SS`）。
pub fn format_local_time(unix_sec: i64) -> String {
    match Local.timestamp_opt(unix_sec, 0).single() {
        Some(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

/// 拼装上传签名路径（不含 query）。
pub fn upload_url_path(path_key: &str, relative_path: &str) -> String {
    format!("{UPLOAD_ROUTE_PREFIX}{path_key}/{relative_path}")
}
