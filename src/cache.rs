//! # Stage: Run Cache
//!
//! ## Responsibility
//! Hold the results of completed runs keyed by anomaly identity and analysis
//! window, so a repeated diagnosis returns the stored result without calling
//! any model.
//!
//! ## Guarantees
//! - Keyed by `(anomaly_id, window)`: the same anomaly under a different
//!   window is a different entry
//! - Bounded: at most `capacity` entries; the oldest insertion is evicted first
//! - TTL expiry is evaluated lazily on every `get` and `insert`
//! - The clock is an explicit `now_ms` argument
//!
//! ## NOT Responsible For
//! - Deciding what to store (the orchestrator only stores completed runs)
//! - Synchronisation (callers wrap it in a `Mutex`)
//! - Persistence

use std::collections::HashMap;

use crate::config::CacheConfig;
use crate::model::AnalysisWindow;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub anomaly_id: String,
    pub window: AnalysisWindow,
}

impl RunKey {
    pub fn new(anomaly_id: impl Into<String>, window: AnalysisWindow) -> Self {
        Self { anomaly_id: anomaly_id.into(), window }
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.anomaly_id, self.window)
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_ms: u64,
    hits: u32,
}

pub struct RunCache<V> {
    ttl_ms: u64,
    capacity: usize,
    entries: HashMap<RunKey, Entry<V>>,
}

impl<V: Clone> RunCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            ttl_ms: config.ttl_secs.saturating_mul(1_000),
            capacity: config.capacity.max(1),
            entries: HashMap::new(),
        }
    }

    /// Live entry for `key`, if any. Counts as a hit.
    pub fn get(&mut self, key: &RunKey, now_ms: u64) -> Option<V> {
        self.evict_expired(now_ms);
        let entry = self.entries.get_mut(key)?;
        entry.hits += 1;
        Some(entry.value.clone())
    }

    /// Store `value` under `key`, overwriting any previous entry.
    pub fn insert(&mut self, key: RunKey, value: V, now_ms: u64) {
        self.evict_expired(now_ms);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key, Entry { value, inserted_ms: now_ms, hits: 0 });
    }

    pub fn evict_expired(&mut self, now_ms: u64) {
        let ttl = self.ttl_ms;
        self.entries.retain(|_, e| now_ms.saturating_sub(e.inserted_ms) < ttl);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.inserted_ms)
            .map(|(k, _)| k.clone())
        {
            self.entries.remove(&oldest);
        }
    }

    /// Hits recorded against `key` since insertion.
    pub fn hit_count(&self, key: &RunKey) -> u32 {
        self.entries.get(key).map(|e| e.hits).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window(end: &str) -> AnalysisWindow {
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap();
        AnalysisWindow::ending(end, 14)
    }

    fn cache(ttl_secs: u64, capacity: usize) -> RunCache<String> {
        RunCache::new(&CacheConfig { ttl_secs, capacity })
    }

    #[test]
    fn test_hit_after_insert() {
        let mut c = cache(60, 4);
        let k = RunKey::new("meta_ads:cpa:2025-01-15", window("2025-01-15"));
        c.insert(k.clone(), "run".into(), 0);
        assert_eq!(c.get(&k, 10).as_deref(), Some("run"));
        assert_eq!(c.hit_count(&k), 1);
    }

    #[test]
    fn test_window_is_part_of_the_key() {
        let mut c = cache(60, 4);
        c.insert(RunKey::new("a", window("2025-01-15")), "run".into(), 0);
        assert!(c.get(&RunKey::new("a", window("2025-01-16")), 1).is_none());
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let mut c = cache(1, 4);
        let k = RunKey::new("a", window("2025-01-15"));
        c.insert(k.clone(), "run".into(), 0);
        assert!(c.get(&k, 999).is_some());
        assert!(c.get(&k, 1_000).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut c = cache(60, 2);
        let w = window("2025-01-15");
        c.insert(RunKey::new("a", w), "1".into(), 0);
        c.insert(RunKey::new("b", w), "2".into(), 1);
        c.insert(RunKey::new("c", w), "3".into(), 2);
        assert_eq!(c.len(), 2);
        assert!(c.get(&RunKey::new("a", w), 3).is_none());
        assert!(c.get(&RunKey::new("c", w), 3).is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut c = cache(60, 2);
        let w = window("2025-01-15");
        c.insert(RunKey::new("a", w), "1".into(), 0);
        c.insert(RunKey::new("b", w), "2".into(), 1);
        c.insert(RunKey::new("a", w), "1b".into(), 2);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&RunKey::new("a", w), 3).as_deref(), Some("1b"));
    }
}
