//! Receiver 共享状态：配置快照、用量计数与防重放缓存。

use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{auth::replay::ReplayCache, config::Settings};

/// 进程级用量计数，只增不减。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct UsageCounters {
    pub(crate) total_uploads: u64,
    pub(crate) total_bytes: u64,
    /// 最近一次成功上传的 unix 秒。
    pub(crate) last_upload_time: Option<i64>,
    pub(crate) failed_auth: u64,
}

impl UsageCounters {
    /// 人类可读的统计摘要。
    pub(crate) fn summary(&self) -> String {
        let last = self
            .last_upload_time
            .map(dr_shared_protocol::format_local_time)
            .unwrap_or_else(|| "无".to_string());
        format!(
            "总上传次数: {} | 总传输大小: {:.2} MB | 最后上传: {} | 认证失败: {}",
            self.total_uploads,
            self.total_bytes as f64 / 1024.0 / 1024.0,
            last,
            self.failed_auth
        )
    }
}

/// Receiver 共享状态。
///
/// 每个请求先克隆一份 `Arc<Settings>` 再处理，锁只在取快照与更新计数时持有。
#[derive(Clone)]
pub(crate) struct AppState {
    settings: Arc<RwLock<Arc<Settings>>>,
    counters: Arc<Mutex<UsageCounters>>,
    replay_cache: Arc<Mutex<ReplayCache>>,
    /// 重载时读取的配置文件；测试中为空。
    config_path: Option<Arc<PathBuf>>,
}

impl AppState {
    /// 以初始配置构造状态。
    pub(crate) fn new(settings: Settings, config_path: Option<PathBuf>) -> Self {
        Self {
            settings: Arc::new(RwLock::new(Arc::new(settings))),
            counters: Arc::new(Mutex::new(UsageCounters::default())),
            replay_cache: Arc::new(Mutex::new(ReplayCache::default())),
            config_path: config_path.map(Arc::new),
        }
    }

    /// 当前配置快照。
    pub(crate) async fn settings(&self) -> Arc<Settings> {
        self.settings.read().await.clone()
    }

    /// 整体替换配置，返回旧配置。
    pub(crate) async fn replace_settings(&self, next: Settings) -> Arc<Settings> {
        let mut guard = self.settings.write().await;
        std::mem::replace(&mut *guard, Arc::new(next))
    }

    /// 重新读取配置文件；失败时保留旧配置。
    pub(crate) async fn reload(&self) -> anyhow::Result<()> {
        let Some(path) = self.config_path.as_ref() else {
            anyhow::bail!("no config file attached to state");
        };
        let next = Settings::load(path)?;
        let next_port = next.port;
        let previous = self.replace_settings(next).await;
        if previous.port != next_port {
            warn!(
                "port changed {} -> {next_port}; restart required to rebind",
                previous.port
            );
        }
        info!("配置已重载: {}", path.display());
        Ok(())
    }

    /// 记录一次成功上传。
    pub(crate) async fn record_upload(&self, bytes: u64, at_unix: i64) {
        let mut guard = self.counters.lock().await;
        guard.total_uploads = guard.total_uploads.saturating_add(1);
        guard.total_bytes = guard.total_bytes.saturating_add(bytes);
        guard.last_upload_time = Some(at_unix);
    }

    /// 记录一次认证失败。
    pub(crate) async fn record_failed_auth(&self) {
        let mut guard = self.counters.lock().await;
        guard.failed_auth = guard.failed_auth.saturating_add(1);
    }

    /// 计数快照。
    pub(crate) async fn counters(&self) -> UsageCounters {
        self.counters.lock().await.clone()
    }

    /// 消费 `(timestamp, nonce)`；窗口内重复出现时返回 false。
    pub(crate) async fn consume_nonce(
        &self,
        timestamp: i64,
        nonce: &str,
        expires_at: i64,
        now: i64,
    ) -> bool {
        let mut guard = self.replay_cache.lock().await;
        guard.check_and_insert(timestamp, nonce, expires_at, now)
    }
}
