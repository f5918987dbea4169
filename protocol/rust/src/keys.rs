//! Ed25519 密钥生成与派生。
//!
//! 私钥接受两种形态：64 字节（32 字节种子 + 32 字节公钥）或 32 字节种子。
//! 服务端只持有公钥，私钥只在客户端出现。

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;

/// Ed25519 种子长度。
pub const SEED_LEN: usize = 32;
/// 扩展私钥长度（种子 + 公钥）。
pub const EXPANDED_KEY_LEN: usize = 64;
/// 公钥长度。
pub const PUBLIC_KEY_LEN: usize = 32;

/// 密钥处理错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// 密钥内容或长度不合法。
    #[error("密钥格式无效: {0}")]
    Format(String),
    /// 操作系统随机源不可用。
    #[error("随机源不可用: {0}")]
    RandomUnavailable(String),
}

/// Ed25519 密钥对。
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// 使用操作系统 CSPRNG 生成新密钥对。
    pub fn generate() -> Result<Self, KeyError> {
        let mut seed = [0u8; SEED_LEN];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|err| KeyError::RandomUnavailable(err.to_string()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// 从私钥字节构造（32 字节种子或 64 字节扩展私钥）。
    pub fn from_private_bytes(raw: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            signing_key: signing_key_from_bytes(raw)?,
        })
    }

    /// 签名私钥。
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// 公钥。
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// 64 字节私钥的十六进制形式。
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_keypair_bytes())
    }

    /// 公钥十六进制形式。
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// 将私钥字节解析为签名密钥。
///
/// 64 字节形态会校验后 32 字节确实由前 32 字节种子派生，
/// 避免签名密钥与对外公布的公钥不一致。
pub fn signing_key_from_bytes(raw: &[u8]) -> Result<SigningKey, KeyError> {
    match raw.len() {
        SEED_LEN => {
            let mut seed = [0u8; SEED_LEN];
            seed.copy_from_slice(raw);
            Ok(SigningKey::from_bytes(&seed))
        }
        EXPANDED_KEY_LEN => {
            let mut full = [0u8; EXPANDED_KEY_LEN];
            full.copy_from_slice(raw);
            SigningKey::from_keypair_bytes(&full)
                .map_err(|_| KeyError::Format("私钥中的公钥部分与种子不匹配".to_string()))
        }
        other => Err(KeyError::Format(format!(
            "私钥长度应为 {SEED_LEN} 或 {EXPANDED_KEY_LEN} 字节，实际 {other} 字节"
        ))),
    }
}

/// 十六进制私钥解析为签名密钥。
pub fn signing_key_from_hex(raw: &str) -> Result<SigningKey, KeyError> {
    let bytes = hex::decode(raw.trim())
        .map_err(|err| KeyError::Format(format!("私钥不是合法十六进制: {err}")))?;
    signing_key_from_bytes(&bytes)
}

/// 从私钥字节派生公钥。
pub fn public_from_private(raw: &[u8]) -> Result<VerifyingKey, KeyError> {
    Ok(signing_key_from_bytes(raw)?.verifying_key())
}

/// 解析十六进制公钥（32 字节且为合法曲线点）。
pub fn public_key_from_hex(raw: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(raw.trim())
        .map_err(|err| KeyError::Format(format!("公钥不是合法十六进制: {err}")))?;
    let fixed: [u8; PUBLIC_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
        KeyError::Format(format!(
            "公钥长度应为 {PUBLIC_KEY_LEN} 字节，实际 {} 字节",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&fixed).map_err(|_| KeyError::Format("公钥无法解析".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{KeyError, KeyPair, public_from_private, public_key_from_hex, signing_key_from_hex};

    #[test]
    fn seed_and_expanded_forms_derive_same_public_key() {
        let pair = KeyPair::generate().expect("generate");
        let expanded = pair.signing_key().to_keypair_bytes();
        let seed = pair.signing_key().to_bytes();

        let from_expanded = public_from_private(&expanded).expect("expanded");
        let from_seed = public_from_private(&seed).expect("seed");
        assert_eq!(from_expanded, pair.public_key());
        assert_eq!(from_seed, pair.public_key());
    }

    #[test]
    fn other_lengths_are_format_errors() {
        for len in [0usize, 16, 31, 33, 63, 65, 128] {
            let err = public_from_private(&vec![7u8; len]).expect_err("must reject");
            assert!(matches!(err, KeyError::Format(_)), "len={len}");
        }
    }

    #[test]
    fn expanded_key_with_foreign_public_half_is_rejected() {
        let a = KeyPair::generate().expect("a");
        let b = KeyPair::generate().expect("b");
        let mut mixed = a.signing_key().to_keypair_bytes();
        mixed[32..].copy_from_slice(&b.public_key().to_bytes());
        assert!(matches!(
            public_from_private(&mixed),
            Err(KeyError::Format(_))
        ));
    }

    #[test]
    fn hex_forms_round_trip_through_parsers() {
        let pair = KeyPair::generate().expect("generate");
        assert_eq!(pair.private_key_hex().len(), 128);
        assert_eq!(pair.public_key_hex().len(), 64);

        let signing = signing_key_from_hex(&pair.private_key_hex()).expect("private");
        assert_eq!(signing.verifying_key(), pair.public_key());
        let public = public_key_from_hex(&pair.public_key_hex()).expect("public");
        assert_eq!(public, pair.public_key());
    }

    #[test]
    fn malformed_public_key_hex_is_rejected() {
        assert!(public_key_from_hex("zz").is_err());
        assert!(public_key_from_hex("abcd").is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let a = KeyPair::generate().expect("a");
        let b = KeyPair::generate().expect("b");
        assert_ne!(a.public_key_hex(), b.public_key_hex());
    }
}
