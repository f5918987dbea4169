//! 配置模块职责：
//! 1. 读取 `config.json`（或 `DR_CONFIG` 指定路径），补齐默认值。
//! 2. 将相对路径映射解析为基于配置文件目录的绝对路径。
//! 3. 在加载阶段校验公钥，运行期只读取已校验的 `Settings`。

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow, bail};
use dr_shared_protocol::public_key_from_hex;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// 默认监听端口。
pub(crate) const DEFAULT_PORT: u16 = 8022;
/// 默认日志目录（相对配置文件目录）。
pub(crate) const DEFAULT_LOG_DIR: &str = "logs";
/// 默认上传上限（MiB）。
pub(crate) const DEFAULT_MAX_UPLOAD_MB: u64 = 500;
/// 默认签名时间窗（秒）。
pub(crate) const DEFAULT_TIMESTAMP_LIMIT_SEC: u64 = 300;
/// 配置文件路径环境变量。
const CONFIG_PATH_ENV: &str = "DR_CONFIG";
/// 端口覆盖环境变量。
const PORT_ENV: &str = "DR_PORT";
/// 默认配置文件名。
const CONFIG_FILE_NAME: &str = "config.json";

/// 配置文件结构（字段名与现网 `config.json` 保持一致）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ReceiverConfigFile {
    #[serde(default)]
    pub(crate) port: u16,
    #[serde(default)]
    pub(crate) paths: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) log_dir: String,
    #[serde(default)]
    pub(crate) max_upload_mb: u64,
    #[serde(default)]
    pub(crate) security: SecurityConfigFile,
}

/// 安全配置段。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SecurityConfigFile {
    #[serde(default)]
    pub(crate) enabled: bool,
    /// Ed25519 公钥（十六进制）；服务端只存公钥。
    #[serde(default)]
    pub(crate) public_key: String,
    #[serde(default)]
    pub(crate) timestamp_limit: u64,
    #[serde(default)]
    pub(crate) allowed_ips: Vec<String>,
    /// 是否信任 `X-Forwarded-For` / `X-Real-IP`，缺省为 true。
    #[serde(default)]
    pub(crate) trust_forwarded_headers: Option<bool>,
    /// 是否启用 `(timestamp, nonce)` 防重放缓存。
    #[serde(default)]
    pub(crate) replay_cache: bool,
}

/// 运行期配置快照（只读）。
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) port: u16,
    /// path key -> 绝对基目录。
    pub(crate) paths: BTreeMap<String, PathBuf>,
    pub(crate) log_dir: PathBuf,
    pub(crate) max_upload_mb: u64,
    pub(crate) max_upload_bytes: u64,
    pub(crate) security: SecuritySettings,
}

/// 运行期安全配置。
#[derive(Debug, Clone)]
pub(crate) struct SecuritySettings {
    pub(crate) enabled: bool,
    pub(crate) public_key: Option<VerifyingKey>,
    pub(crate) timestamp_limit: u64,
    pub(crate) allowed_ips: Vec<String>,
    pub(crate) trust_forwarded_headers: bool,
    pub(crate) replay_cache: bool,
}

impl Settings {
    /// 从配置文件加载，并应用 `DR_PORT` 覆盖。
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            bail!(
                "配置文件不存在: {}，请手动创建或通过 {CONFIG_PATH_ENV} 指定",
                path.display()
            );
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config failed: {}", path.display()))?;
        let parsed: ReceiverConfigFile = serde_json::from_str(&raw)
            .with_context(|| format!("decode config failed: {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut settings = Self::from_file_config(parsed, &absolute(&base_dir))?;
        if let Some(port) = port_from_env() {
            settings.port = port;
        }
        Ok(settings)
    }

    /// 将配置文件结构转换为运行期配置：补默认值、解析路径与公钥。
    pub(crate) fn from_file_config(
        raw: ReceiverConfigFile,
        base_dir: &Path,
    ) -> anyhow::Result<Self> {
        let port = if raw.port == 0 {
            DEFAULT_PORT
        } else {
            raw.port
        };
        let max_upload_mb = if raw.max_upload_mb == 0 {
            DEFAULT_MAX_UPLOAD_MB
        } else {
            raw.max_upload_mb
        };
        let log_dir = if raw.log_dir.trim().is_empty() {
            DEFAULT_LOG_DIR
        } else {
            raw.log_dir.trim()
        };

        let mut paths = BTreeMap::new();
        for (key, dir) in raw.paths {
            let key = key.trim().to_string();
            let dir = dir.trim();
            if key.is_empty() || key.contains('/') || dir.is_empty() {
                bail!("invalid path mapping: {key:?} -> {dir:?}");
            }
            paths.insert(key, resolve_against(base_dir, dir));
        }

        let security = SecuritySettings::from_file_config(raw.security)?;
        Ok(Self {
            port,
            paths,
            log_dir: resolve_against(base_dir, log_dir),
            max_upload_mb,
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            security,
        })
    }

    /// 已配置的 path key（有序）。
    pub(crate) fn path_keys(&self) -> Vec<String> {
        self.paths.keys().cloned().collect()
    }
}

impl SecuritySettings {
    fn from_file_config(raw: SecurityConfigFile) -> anyhow::Result<Self> {
        let public_key = if raw.public_key.trim().is_empty() {
            None
        } else {
            Some(public_key_from_hex(&raw.public_key).map_err(|err| anyhow!("无效的公钥: {err}"))?)
        };
        if raw.enabled && public_key.is_none() {
            bail!("security.enabled 为 true 时必须配置 security.public_key");
        }
        let timestamp_limit = if raw.timestamp_limit == 0 {
            DEFAULT_TIMESTAMP_LIMIT_SEC
        } else {
            raw.timestamp_limit
        };
        Ok(Self {
            enabled: raw.enabled,
            public_key,
            timestamp_limit,
            allowed_ips: raw
                .allowed_ips
                .into_iter()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .collect(),
            trust_forwarded_headers: raw.trust_forwarded_headers.unwrap_or(true),
            replay_cache: raw.replay_cache,
        })
    }
}

/// 配置文件路径：优先 `DR_CONFIG`，否则取可执行文件同目录下的 `config.json`。
pub(crate) fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    exe_dir().join(CONFIG_FILE_NAME)
}

/// 可执行文件所在目录；无法获取时回退当前目录。
pub(crate) fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 读取端口覆盖。
fn port_from_env() -> Option<u16> {
    std::env::var(PORT_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<u16>().ok())
        .filter(|port| *port > 0)
}

/// 相对路径基于 `base_dir` 解析。
fn resolve_against(base_dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// 转为绝对路径；当前目录不可用时原样返回。
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path),
        Err(_) => path.to_path_buf(),
    }
}
