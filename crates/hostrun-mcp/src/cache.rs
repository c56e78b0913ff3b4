//! Tool cache keyed by configuration fingerprint.
//!
//! Entries are shared across sessions with the same configuration. The map
//! lock is held only for the lookup or insert; discovery happens outside it,
//! so concurrent misses for one fingerprint may both discover.

use crate::client::ToolDescriptor;
use crate::config::Fingerprint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry {
    tools: Arc<Vec<ToolDescriptor>>,
    stored_at: Instant,
}

/// Fingerprint → tool list, with a time-to-live.
pub struct ToolCache {
    enabled: bool,
    ttl: Duration,
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl ToolCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached tools younger than the TTL, if any.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Vec<ToolDescriptor>>> {
        if !self.enabled {
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(fingerprint) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(Arc::clone(&entry.tools)),
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Store or overwrite the tool list for `fingerprint`.
    pub fn put(&self, fingerprint: Fingerprint, tools: Arc<Vec<ToolDescriptor>>) {
        if !self.enabled {
            return;
        }
        self.entries.lock().insert(
            fingerprint,
            CacheEntry {
                tools,
                stored_at: Instant::now(),
            },
        );
    }

    /// Evict `fingerprint`. Returns whether an entry was present.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().remove(fingerprint).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn tools(names: &[&str]) -> Arc<Vec<ToolDescriptor>> {
        Arc::new(
            names
                .iter()
                .map(|n| ToolDescriptor {
                    name: n.to_string(),
                    description: String::new(),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect(),
        )
    }

    fn fp(name: &str) -> Fingerprint {
        ServerConfig::new(name, "npx").fingerprint()
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = ToolCache::new(true, Duration::from_secs(300));
        cache.put(fp("fs"), tools(&["read_file"]));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(&fp("fs")).unwrap()[0].name, "read_file");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&fp("fs")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn put_overwrites_and_restamps() {
        let cache = ToolCache::new(true, Duration::from_secs(10));
        cache.put(fp("fs"), tools(&["a"]));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put(fp("fs"), tools(&["a", "b"]));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&fp("fs")).unwrap().len(), 2);
    }

    #[test]
    fn empty_tool_lists_are_cached() {
        let cache = ToolCache::new(true, Duration::from_secs(60));
        cache.put(fp("empty"), tools(&[]));
        assert!(cache.get(&fp("empty")).unwrap().is_empty());
    }

    #[test]
    fn invalidate_removes_only_that_fingerprint() {
        let cache = ToolCache::new(true, Duration::from_secs(60));
        cache.put(fp("a"), tools(&["x"]));
        cache.put(fp("b"), tools(&["y"]));
        assert!(cache.invalidate(&fp("a")));
        assert!(!cache.invalidate(&fp("a")));
        assert!(cache.get(&fp("a")).is_none());
        assert!(cache.get(&fp("b")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_keeps_fresh_entries() {
        let cache = ToolCache::new(true, Duration::from_secs(10));
        cache.put(fp("old"), tools(&["x"]));
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.put(fp("new"), tools(&["y"]));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fp("new")).is_some());
    }

    #[test]
    fn disabled_cache_never_answers() {
        let cache = ToolCache::new(false, Duration::from_secs(60));
        cache.put(fp("fs"), tools(&["x"]));
        assert!(cache.get(&fp("fs")).is_none());
        assert!(cache.is_empty());
    }
}
