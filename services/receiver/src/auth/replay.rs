//! `(timestamp, nonce)` 防重放缓存。
//!
//! 条目在签名时间窗结束时过期；容量满时淘汰最早过期的条目。

use std::collections::{BTreeSet, HashMap};

/// 默认容量。
pub(crate) const DEFAULT_REPLAY_CAPACITY: usize = 65_536;

/// 有界 TTL 的已用 nonce 集合。
#[derive(Debug)]
pub(crate) struct ReplayCache {
    /// `(timestamp, nonce)` -> 过期 unix 秒。
    entries: HashMap<(i64, String), i64>,
    /// 按过期时间排序的索引，与 `entries` 一一对应。
    by_expiry: BTreeSet<(i64, (i64, String))>,
    capacity: usize,
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }
}

impl ReplayCache {
    /// 指定容量构造。
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_expiry: BTreeSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// 首次出现返回 true 并记录；窗口内重复返回 false。
    pub(crate) fn check_and_insert(
        &mut self,
        timestamp: i64,
        nonce: &str,
        expires_at: i64,
        now: i64,
    ) -> bool {
        self.purge_expired(now);
        let key = (timestamp, nonce.trim().to_string());
        if self.entries.contains_key(&key) {
            return false;
        }
        if self.entries.len() >= self.capacity {
            self.evict_earliest();
        }
        self.by_expiry.insert((expires_at, key.clone()));
        self.entries.insert(key, expires_at);
        true
    }

    /// 只弹出已过期的条目，不遍历整个集合。
    fn purge_expired(&mut self, now: i64) {
        while self
            .by_expiry
            .first()
            .is_some_and(|(expires_at, _)| *expires_at < now)
        {
            self.evict_earliest();
        }
    }

    fn evict_earliest(&mut self) {
        if let Some((_, key)) = self.by_expiry.pop_first() {
            self.entries.remove(&key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.entries.len(), self.by_expiry.len());
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::ReplayCache;

    #[test]
    fn second_use_inside_window_is_rejected() {
        let mut cache = ReplayCache::default();
        assert!(cache.check_and_insert(100, "n1", 400, 100));
        assert!(!cache.check_and_insert(100, "n1", 400, 150));
        assert!(cache.check_and_insert(100, "n2", 400, 150));
        assert!(cache.check_and_insert(101, "n1", 401, 150));
    }

    #[test]
    fn expired_entries_are_purged() {
        let mut cache = ReplayCache::default();
        assert!(cache.check_and_insert(100, "n1", 400, 100));
        assert!(cache.check_and_insert(500, "n2", 800, 500));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn full_cache_evicts_earliest_expiry() {
        let mut cache = ReplayCache::with_capacity(2);
        assert!(cache.check_and_insert(1, "a", 10, 0));
        assert!(cache.check_and_insert(2, "b", 20, 0));
        assert!(cache.check_and_insert(3, "c", 30, 0));
        assert_eq!(cache.len(), 2);
        // "a" 已被淘汰
        assert!(cache.check_and_insert(1, "a", 10, 0));
        assert!(!cache.check_and_insert(3, "c", 30, 0));
    }

    #[test]
    fn purge_stops_at_first_live_entry() {
        let mut cache = ReplayCache::with_capacity(16);
        for (ts, exp) in [(1, 10), (2, 20), (3, 30), (4, 40)] {
            assert!(cache.check_and_insert(ts, "n", exp, 0));
        }
        assert!(cache.check_and_insert(5, "n", 50, 25));
        assert_eq!(cache.len(), 3);
        assert!(!cache.check_and_insert(3, "n", 30, 25));
        assert!(cache.check_and_insert(1, "n", 10, 25));
        // 恰好到期的那一秒仍在窗口内
        assert!(!cache.check_and_insert(4, "n", 40, 40));
    }
}
