//! Short-lived cache for per-hash detail endpoints.
//!
//! Piece states, peers, files, properties, and web seeds are not part of
//! the snapshot; they are fetched per call and held briefly to dampen UI
//! polling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Detail endpoints cached per `(instance, hash)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailEndpoint {
    /// `torrents/properties`.
    Properties,
    /// `torrents/files`.
    Files,
    /// `torrents/trackers`.
    Trackers,
    /// `sync/torrentPeers`.
    Peers,
    /// `torrents/webseeds`.
    WebSeeds,
    /// `torrents/pieceStates`.
    PieceStates,
}

type Key = (i64, String, DetailEndpoint);

/// TTL cache keyed by `(instance, hash, endpoint)`.
pub struct DetailCache {
    ttl: Duration,
    entries: Mutex<HashMap<Key, (Instant, Value)>>,
}

impl DetailCache {
    /// Build a cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a cached value when present and unexpired.
    #[must_use]
    pub fn get(&self, instance_id: i64, hash: &str, endpoint: DetailEndpoint) -> Option<Value> {
        let entries = self.entries.lock().ok()?;
        let (stored_at, value) = entries.get(&(instance_id, hash.to_string(), endpoint))?;
        if stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(value.clone())
    }

    /// Store a freshly-fetched value, opportunistically dropping expired
    /// entries to bound growth.
    pub fn put(&self, instance_id: i64, hash: &str, endpoint: DetailEndpoint, value: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() <= self.ttl);
            entries.insert(
                (instance_id, hash.to_string(), endpoint),
                (Instant::now(), value),
            );
        }
    }

    /// Drop every entry for an instance (after mutation or invalidation).
    pub fn purge_instance(&self, instance_id: i64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(id, _, _), _| *id != instance_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let cache = DetailCache::new(Duration::from_millis(10));
        cache.put(1, "aa", DetailEndpoint::Properties, Value::from(1));
        assert!(cache.get(1, "aa", DetailEndpoint::Properties).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(1, "aa", DetailEndpoint::Properties).is_none());
    }

    #[test]
    fn endpoints_are_cached_independently() {
        let cache = DetailCache::new(Duration::from_secs(5));
        cache.put(1, "aa", DetailEndpoint::Files, Value::from("files"));
        assert!(cache.get(1, "aa", DetailEndpoint::Trackers).is_none());
        assert_eq!(
            cache.get(1, "aa", DetailEndpoint::Files),
            Some(Value::from("files"))
        );
    }

    #[test]
    fn purge_clears_only_the_instance() {
        let cache = DetailCache::new(Duration::from_secs(5));
        cache.put(1, "aa", DetailEndpoint::Files, Value::from(1));
        cache.put(2, "aa", DetailEndpoint::Files, Value::from(2));
        cache.purge_instance(1);
        assert!(cache.get(1, "aa", DetailEndpoint::Files).is_none());
        assert!(cache.get(2, "aa", DetailEndpoint::Files).is_some());
    }
}
