//! 请求签名：`timestamp ‖ nonce ‖ urlPath` 规范消息的签发与校验。
//!
//! `urlPath` 只包含路径部分，不带 `?extract=true` 之类的 query，
//! 服务端按同样规则重建消息，两端任何差异都会导致验签失败。

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;

use crate::{keys::KeyError, now_unix};

/// nonce 随机字节数。
pub const NONCE_LEN: usize = 16;
/// 签名字节数。
pub const SIGNATURE_LEN: usize = 64;

/// 一次请求的签名头。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// unix 秒（十进制文本）。
    pub timestamp: String,
    /// 16 字节随机数（十六进制）。
    pub nonce: String,
    /// Ed25519 签名（十六进制）。
    pub signature: String,
}

/// 验签失败原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("签名格式无效")]
    Malformed,
    #[error("签名验证失败")]
    Mismatch,
}

/// 拼装规范签名消息。
pub fn canonical_message(timestamp: &str, nonce: &str, url_path: &str) -> String {
    let mut message = String::with_capacity(timestamp.len() + nonce.len() + url_path.len());
    message.push_str(timestamp);
    message.push_str(nonce);
    message.push_str(url_path);
    message
}

/// 生成 16 字节随机 nonce（十六进制）。
pub fn generate_nonce() -> Result<String, KeyError> {
    let mut buf = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|err| KeyError::RandomUnavailable(err.to_string()))?;
    Ok(hex::encode(buf))
}

/// 为 `url_path` 生成当前时刻的签名头。
pub fn create_signed_headers(
    signing_key: &SigningKey,
    url_path: &str,
) -> Result<SignedHeaders, KeyError> {
    let nonce = generate_nonce()?;
    Ok(create_signed_headers_at(
        signing_key,
        url_path,
        now_unix(),
        &nonce,
    ))
}

/// 使用指定时间戳与 nonce 生成签名头。
pub fn create_signed_headers_at(
    signing_key: &SigningKey,
    url_path: &str,
    timestamp: i64,
    nonce: &str,
) -> SignedHeaders {
    let timestamp = timestamp.to_string();
    let message = canonical_message(&timestamp, nonce, url_path);
    let signature = signing_key.sign(message.as_bytes());
    SignedHeaders {
        timestamp,
        nonce: nonce.to_string(),
        signature: hex::encode(signature.to_bytes()),
    }
}

/// 校验十六进制签名。
pub fn verify_signature(
    public_key: &VerifyingKey,
    message: &str,
    signature_hex: &str,
) -> Result<(), SignatureError> {
    let raw = hex::decode(signature_hex.trim()).map_err(|_| SignatureError::Malformed)?;
    let bytes: [u8; SIGNATURE_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| SignatureError::Malformed)?;
    let signature = Signature::from_bytes(&bytes);
    public_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| SignatureError::Mismatch)
}
