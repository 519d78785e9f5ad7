//! Completion cache shared by every session in the process.
//!
//! Entries are keyed by a SHA-256 [`Fingerprint`] of the invocation input and
//! carry their own TTL. The LRU order is maintained by `lru::LruCache`; every
//! structural change (insert, evict, touch-on-read) happens under the write
//! half of an `RwLock`, while inspection (`contains`, `peek_entry`, `len`)
//! only takes the read half.
//!
//! Timestamps use `tokio::time::Instant` so TTL behaviour can be driven with a
//! paused clock in tests.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;

pub type SharedCompletionCache = Arc<CompletionCache>;

// ─── Fingerprint ─────────────────────────────────────────────────────────────

/// Fixed-width cache key derived from prompt text plus an auxiliary context map.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash `prompt` together with the canonical form of `context`.
    ///
    /// The prompt is length-prefixed so that no prompt/context split can
    /// collide with another one.
    pub fn compute(prompt: &str, context: &BTreeMap<String, Value>) -> Self {
        let mut canonical = String::new();
        write_canonical_object(context.iter(), &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update((prompt.len() as u64).to_le_bytes());
        hasher.update(prompt.as_bytes());
        hasher.update(canonical.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_prompt(prompt: &str) -> Self {
        Self::compute(prompt, &BTreeMap::new())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

fn write_canonical_object<'a>(
    fields: impl Iterator<Item = (&'a String, &'a Value)>,
    out: &mut String,
) {
    let mut fields: Vec<_> = fields.collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (index, (key, value)) in fields.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

/// Serialize `value` with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_object(map.iter(), out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ─── Entries & Stats ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Read-only view of one cache entry
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: Fingerprint,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    pub ttl: Duration,
}

/// Counters plus current occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub inserts: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups answered from the cache (expired lookups count as misses).
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses + self.expirations;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    inserts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

pub struct CompletionCache {
    entries: RwLock<LruCache<Fingerprint, CacheEntry>>,
    capacity: NonZeroUsize,
    default_ttl: Duration,
    counters: Counters,
}

impl CompletionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            capacity,
            default_ttl: config.default_ttl,
            counters: Counters::default(),
        }
    }

    /// Create the process-wide instance handed to every scheduler.
    pub fn shared(config: &CacheConfig) -> SharedCompletionCache {
        let cache = Arc::new(Self::new(config));
        tracing::info!(
            max_size = cache.capacity.get(),
            default_ttl_secs = cache.default_ttl.as_secs(),
            "Completion cache created"
        );
        cache
    }

    /// Look up a fingerprint; a hit refreshes its LRU position.
    pub fn get(&self, key: &Fingerprint) -> Option<Value> {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!(key = ?key, "Completion cache lock poisoned; treating lookup as miss");
            Counters::bump(&self.counters.misses, 1);
            return None;
        };

        let now = Instant::now();
        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                Counters::bump(&self.counters.misses, 1);
                return None;
            }
        };

        if expired {
            entries.pop(key);
            Counters::bump(&self.counters.expirations, 1);
            tracing::debug!(key = ?key, "Completion cache entry expired on read");
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_accessed = now;
        entry.access_count += 1;
        Counters::bump(&self.counters.hits, 1);
        Some(entry.value.clone())
    }

    /// Insert or replace an entry. Inserting a new key into a full cache evicts
    /// the least recently used entry.
    pub fn set(&self, key: Fingerprint, value: Value, ttl: Duration) {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!(key = ?key, "Completion cache lock poisoned; dropping insert");
            return;
        };

        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
        };

        if let Some((displaced, _)) = entries.push(key, entry) {
            if displaced != key {
                Counters::bump(&self.counters.evictions, 1);
                tracing::debug!(evicted = ?displaced, "Completion cache evicted LRU entry");
            }
        }
        Counters::bump(&self.counters.inserts, 1);
    }

    pub fn set_default(&self, key: Fingerprint, value: Value) {
        self.set(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &Fingerprint) -> bool {
        match self.entries.write() {
            Ok(mut entries) => entries.pop(key).is_some(),
            Err(_) => false,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    /// Remove every entry whose TTL has elapsed, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };

        let now = Instant::now();
        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        Counters::bump(&self.counters.expirations, expired.len() as u64);
        expired.len()
    }

    /// True when a live (unexpired) entry exists. Does not touch LRU order.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.peek(key).is_some_and(|entry| !entry.is_expired(now)))
            .unwrap_or(false)
    }

    pub fn peek_entry(&self, key: &Fingerprint) -> Option<CacheEntryInfo> {
        let entries = self.entries.read().ok()?;
        entries.peek(key).map(|entry| CacheEntryInfo {
            key: *key,
            created_at: entry.created_at,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
            ttl: entry.ttl,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.capacity(),
        }
    }

    /// Tear-down point for the process-wide cache.
    pub fn shutdown(&self) {
        let stats = self.stats();
        self.clear();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            expirations = stats.expirations,
            evictions = stats.evictions,
            inserts = stats.inserts,
            hit_rate = stats.hit_rate(),
            "Completion cache shut down"
        );
    }
}

/// Periodically drop expired entries until `shutdown` is cancelled.
pub fn spawn_expiry_sweeper(
    cache: SharedCompletionCache,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; skip that tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired completion cache entries");
                    }
                }
            }
        }
        tracing::debug!("Completion cache sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(max_size: usize) -> CompletionCache {
        CompletionCache::new(&CacheConfig {
            max_size,
            default_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        })
    }

    fn key(name: &str) -> Fingerprint {
        Fingerprint::from_prompt(name)
    }

    #[test]
    fn test_fingerprint_is_stable_and_context_sensitive() {
        let mut context = BTreeMap::new();
        context.insert("actor".to_string(), json!("coder"));
        context.insert("role".to_string(), json!("worker"));

        let a = Fingerprint::compute("history", &context);
        let b = Fingerprint::compute("history", &context);
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);

        let mut other = context.clone();
        other.insert("actor".to_string(), json!("planner"));
        assert_ne!(a, Fingerprint::compute("history", &other));
        assert_ne!(a, Fingerprint::from_prompt("history"));
    }

    #[test]
    fn test_fingerprint_ignores_nested_key_order() {
        let mut first = BTreeMap::new();
        first.insert("meta".to_string(), json!({"b": 1, "a": {"y": 2, "x": 3}}));
        let mut second = BTreeMap::new();
        second.insert("meta".to_string(), json!({"a": {"x": 3, "y": 2}, "b": 1}));

        assert_eq!(
            Fingerprint::compute("p", &first),
            Fingerprint::compute("p", &second)
        );
    }

    #[test]
    fn test_prompt_context_boundary_does_not_collide() {
        let mut context = BTreeMap::new();
        context.insert("k".to_string(), json!("v"));
        let split_a = Fingerprint::compute("ab", &context);
        let split_b = Fingerprint::compute("a", &context);
        assert_ne!(split_a, split_b);
    }

    #[test]
    fn test_get_after_set_returns_value() {
        let cache = cache_with(4);
        cache.set(key("k"), json!({"content": "v"}), Duration::from_secs(5));

        assert_eq!(cache.get(&key("k")), Some(json!({"content": "v"})));
        let info = cache.peek_entry(&key("k")).unwrap();
        assert_eq!(info.access_count, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_lru_eviction_follows_access_order() {
        let cache = cache_with(2);
        cache.set_default(key("k1"), json!("v1"));
        cache.set_default(key("k2"), json!("v2"));
        assert!(cache.get(&key("k1")).is_some());
        cache.set_default(key("k3"), json!("v3"));

        assert!(cache.contains(&key("k1")));
        assert!(!cache.contains(&key("k2")));
        assert!(cache.contains(&key("k3")));
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replacing_a_key_does_not_evict() {
        let cache = cache_with(2);
        cache.set_default(key("k1"), json!("old"));
        cache.set_default(key("k2"), json!("v2"));
        cache.set_default(key("k1"), json!("new"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&key("k1")), Some(json!("new")));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = cache_with(4);
        cache.set_default(key("a"), json!(1));
        cache.set_default(key("b"), json!(2));

        assert!(cache.invalidate(&key("a")));
        assert!(!cache.invalidate(&key("a")));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_miss_is_counted() {
        let cache = cache_with(4);
        assert!(cache.get(&key("absent")).is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_counts_as_expiration() {
        let cache = cache_with(4);
        cache.set(key("k"), json!("v"), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get(&key("k")).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&key("k")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 0);
        assert!(cache.peek_entry(&key("k")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired_is_idempotent() {
        let cache = cache_with(8);
        cache.set(key("short-1"), json!(1), Duration::from_secs(1));
        cache.set(key("short-2"), json!(2), Duration::from_secs(1));
        cache.set(key("long"), json!(3), Duration::from_secs(600));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.cleanup_expired(), 0);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&key("long")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries_until_cancelled() {
        let cache = Arc::new(cache_with(8));
        cache.set(key("k"), json!("v"), Duration::from_secs(1));

        let shutdown = CancellationToken::new();
        let handle = spawn_expiry_sweeper(cache.clone(), Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
