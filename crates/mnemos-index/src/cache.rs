//! Recency Cache.
//!
//! [`LruCache`] keeps the most recently touched entries in memory above the
//! persistent stores.  Recency is tracked with a doubly linked list whose
//! nodes live in a slot arena (`Vec<Option<Slot>>`) and link to each other by
//! index, so move-to-head and evict-tail stay O(1) without raw pointers.
//!
//! # Memory pressure
//!
//! Before every [`LruCache::set`] the cache asks its [`MemoryGauge`] how much
//! memory is in use.  Above `pressure_threshold` (default 80 %) it evicts a
//! batch of `pressure_eviction_ratio × capacity` entries from the tail, even
//! if the cache is not full.  Evicting an entry never touches the data it
//! mirrors.
//!
//! # Example
//!
//! ```rust
//! use mnemos_index::cache::LruCache;
//!
//! let mut cache = LruCache::new(2);
//! cache.set("a", 1);
//! cache.set("b", 2);
//! cache.get(&"a");         // "a" becomes most recent
//! cache.set("c", 3);       // evicts "b"
//!
//! assert!(cache.has(&"a"));
//! assert!(!cache.has(&"b"));
//! assert_eq!(cache.len(), 2);
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// Default fraction of memory in use above which proactive eviction kicks in.
pub const DEFAULT_PRESSURE_THRESHOLD: f64 = 0.8;

/// Default fraction of capacity evicted in one pressure batch.
pub const DEFAULT_PRESSURE_EVICTION_RATIO: f64 = 0.5;

// ─────────────────────────────────────────────────────────────────────────────
// Memory gauges
// ─────────────────────────────────────────────────────────────────────────────

/// Source of the memory-usage signal consulted before each insert.
pub trait MemoryGauge: Send + Sync {
    /// Fraction of memory currently in use, in `[0.0, 1.0]`.
    fn usage_ratio(&self) -> f64;
}

/// Gauge that never reports pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPressure;

impl MemoryGauge for NoPressure {
    fn usage_ratio(&self) -> f64 {
        0.0
    }
}

/// Reads `MemTotal` / `MemAvailable` from `/proc/meminfo`.
///
/// The reading is cached for `refresh` so a burst of inserts costs one file
/// read.  On platforms without `/proc/meminfo` it reports no pressure.
pub struct SystemMemoryGauge {
    refresh: Duration,
    last: Mutex<Option<(Instant, f64)>>,
}

impl SystemMemoryGauge {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            last: Mutex::new(None),
        }
    }

    fn read_meminfo() -> Option<f64> {
        let raw = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mut total = None;
        let mut available = None;
        for line in raw.lines() {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<f64>().ok()),
                Some("MemAvailable:") => {
                    available = parts.next().and_then(|v| v.parse::<f64>().ok())
                }
                _ => {}
            }
        }
        match (total, available) {
            (Some(t), Some(a)) if t > 0.0 => Some(((t - a) / t).clamp(0.0, 1.0)),
            _ => None,
        }
    }
}

impl Default for SystemMemoryGauge {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl MemoryGauge for SystemMemoryGauge {
    fn usage_ratio(&self) -> f64 {
        let mut last = self.last.lock();
        if let Some((at, ratio)) = *last
            && at.elapsed() < self.refresh
        {
            return ratio;
        }
        let ratio = Self::read_meminfo().unwrap_or(0.0);
        *last = Some((Instant::now(), ratio));
        ratio
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Counters reported by [`LruCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub pressure_evictions: u64,
    pub hit_rate: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// LruCache
// ─────────────────────────────────────────────────────────────────────────────

struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
    accessed_at: Instant,
}

/// Fixed-capacity least-recently-used cache.
///
/// `head` is the most recently used entry and `tail` the least.  After every
/// mutation `len() <= capacity()`.
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    gauge: Box<dyn MemoryGauge>,
    pressure_threshold: f64,
    pressure_eviction_ratio: f64,
    hits: u64,
    misses: u64,
    evictions: u64,
    pressure_evictions: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1) that
    /// never sees memory pressure.
    pub fn new(capacity: usize) -> Self {
        Self::with_gauge(capacity, Box::new(NoPressure))
    }

    /// Create a cache that consults `gauge` before every insert.
    pub fn with_gauge(capacity: usize, gauge: Box<dyn MemoryGauge>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            gauge,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
            pressure_eviction_ratio: DEFAULT_PRESSURE_EVICTION_RATIO,
            hits: 0,
            misses: 0,
            evictions: 0,
            pressure_evictions: 0,
        }
    }

    /// Override the pressure threshold and batch ratio (both clamped to
    /// `[0, 1]`).
    pub fn with_pressure_policy(mut self, threshold: f64, eviction_ratio: f64) -> Self {
        self.pressure_threshold = threshold.clamp(0.0, 1.0);
        self.pressure_eviction_ratio = eviction_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(&idx) = self.map.get(key) else {
            self.misses += 1;
            return None;
        };
        self.hits += 1;
        self.detach(idx);
        self.push_front(idx);
        let slot = self.slots[idx].as_mut()?;
        slot.accessed_at = Instant::now();
        Some(&slot.value)
    }

    /// Look up `key` without changing recency or stats.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|s| &s.value)
    }

    /// Time of the last `get`/`set` that touched `key`.
    pub fn accessed_at<Q>(&self, key: &Q) -> Option<Instant>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|s| s.accessed_at)
    }

    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Insert or update `key`, making it the most recently used entry.
    pub fn set(&mut self, key: K, value: V) {
        self.relieve_pressure();

        if let Some(&idx) = self.map.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
                slot.accessed_at = Instant::now();
            }
            self.detach(idx);
            self.push_front(idx);
            return;
        }

        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
            accessed_at: Instant::now(),
        };
        let idx = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);

        if self.map.len() > self.capacity {
            self.evict_tail();
            self.evictions += 1;
        }
    }

    /// Remove `key`, returning its value.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        let slot = self.slots[idx].take()?;
        self.free.push(idx);
        Some(slot.value)
    }

    /// Drop every entry. Stats counters are kept.
    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.slots[idx].as_ref() {
                Some(slot) => {
                    out.push(slot.key.clone());
                    cursor = slot.next;
                }
                None => break,
            }
        }
        out
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            size: self.map.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            pressure_evictions: self.pressure_evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn relieve_pressure(&mut self) {
        if self.map.is_empty() {
            return;
        }
        let ratio = self.gauge.usage_ratio();
        if ratio <= self.pressure_threshold {
            return;
        }
        let batch = ((self.capacity as f64 * self.pressure_eviction_ratio) as usize)
            .max(1)
            .min(self.map.len());
        warn!(
            usage = ratio,
            threshold = self.pressure_threshold,
            batch,
            "memory pressure: evicting cache entries"
        );
        for _ in 0..batch {
            self.evict_tail();
        }
        self.pressure_evictions += batch as u64;
    }

    fn evict_tail(&mut self) {
        let Some(idx) = self.tail else { return };
        self.detach(idx);
        if let Some(slot) = self.slots[idx].take() {
            self.map.remove(&slot.key);
        }
        self.free.push(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(s) = self.slots[p].as_mut() {
                    s.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(s) = self.slots[n].as_mut() {
                    s.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(s) = self.slots[h].as_mut()
        {
            s.prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Gauge whose reading the test can change between inserts.
    #[derive(Clone, Default)]
    struct DialGauge(Arc<AtomicU64>);

    impl DialGauge {
        fn set(&self, ratio: f64) {
            self.0.store(ratio.to_bits(), Ordering::SeqCst);
        }
    }

    impl MemoryGauge for DialGauge {
        fn usage_ratio(&self) -> f64 {
            f64::from_bits(self.0.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut cache = LruCache::new(8);
        for _ in 0..500 {
            let k: u32 = rng.gen_range(0..40);
            cache.set(k, k * 2);
            assert!(cache.len() <= 8);
        }
    }

    #[test]
    fn least_recently_touched_is_evicted_first() {
        let mut cache = LruCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        cache.get("a");
        cache.set("d", 4);
        assert!(!cache.has("b"));
        assert_eq!(cache.keys(), vec!["d", "a", "c"]);
    }

    #[test]
    fn set_existing_updates_in_place_and_promotes() {
        let mut cache = LruCache::new(2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys()[0], "a");
        assert_eq!(cache.peek("a"), Some(&10));
        cache.set("c", 3);
        assert!(!cache.has("b"));
    }

    #[test]
    fn miss_returns_none_and_counts() {
        let mut cache: LruCache<String, u8> = LruCache::new(4);
        assert!(cache.get("ghost").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn peek_does_not_promote() {
        let mut cache = LruCache::new(2);
        cache.set(1, "one");
        cache.set(2, "two");
        assert_eq!(cache.peek(&1), Some(&"one"));
        cache.set(3, "three");
        assert!(!cache.has(&1));
    }

    #[test]
    fn delete_frees_slot_for_reuse() {
        let mut cache = LruCache::new(2);
        cache.set(1, 'a');
        cache.set(2, 'b');
        assert_eq!(cache.delete(&1), Some('a'));
        assert_eq!(cache.delete(&1), None);
        cache.set(3, 'c');
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec![3, 2]);
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = LruCache::new(4);
        cache.set(1, 1);
        cache.set(2, 2);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
        cache.set(3, 3);
        assert_eq!(cache.keys(), vec![3]);
    }

    #[test]
    fn head_is_always_most_recent() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut cache = LruCache::new(5);
        for _ in 0..200 {
            let k: u8 = rng.gen_range(0..10);
            if rng.gen_bool(0.5) {
                cache.set(k, ());
                assert_eq!(cache.keys()[0], k);
            } else if cache.get(&k).is_some() {
                assert_eq!(cache.keys()[0], k);
            }
        }
    }

    #[test]
    fn pressure_evicts_half_capacity_batch() {
        let gauge = DialGauge::default();
        let mut cache = LruCache::with_gauge(10, Box::new(gauge.clone()));
        for i in 0..8 {
            cache.set(i, i);
        }
        gauge.set(0.95);
        cache.set(100, 100);
        // 5 oldest evicted, then the new key added.
        assert_eq!(cache.len(), 4);
        assert!(cache.has(&100));
        assert!(!cache.has(&0));
        assert!(cache.has(&7));
        assert_eq!(cache.stats().pressure_evictions, 5);
    }

    #[test]
    fn pressure_below_threshold_is_ignored() {
        let gauge = DialGauge::default();
        gauge.set(0.5);
        let mut cache = LruCache::with_gauge(4, Box::new(gauge));
        for i in 0..4 {
            cache.set(i, i);
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().pressure_evictions, 0);
    }

    #[test]
    fn custom_pressure_policy() {
        let gauge = DialGauge::default();
        gauge.set(0.7);
        let mut cache = LruCache::with_gauge(4, Box::new(gauge)).with_pressure_policy(0.6, 0.25);
        cache.set(1, 1);
        cache.set(2, 2);
        // one entry evicted before the second insert
        assert_eq!(cache.len(), 1);
        assert!(cache.has(&2));
    }

    #[test]
    fn stats_track_hits_and_evictions() {
        let mut cache = LruCache::new(1);
        cache.set("x", 1);
        cache.get("x");
        cache.get("y");
        cache.set("z", 2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn get_stamps_access_time() {
        let mut cache = LruCache::new(2);
        cache.set("a", 1);
        let first = cache.accessed_at("a").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.get("a");
        assert!(cache.accessed_at("a").unwrap() > first);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut cache = LruCache::new(0);
        cache.set(1, 1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn system_gauge_serves_cached_reading_within_refresh() {
        let gauge = Arc::new(SystemMemoryGauge::new(Duration::from_secs(3600)));
        *gauge.last.lock() = Some((Instant::now(), 0.42));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let gauge = Arc::clone(&gauge);
                std::thread::spawn(move || gauge.usage_ratio())
            })
            .collect();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), 0.42);
        }
    }

    #[test]
    fn system_gauge_rereads_once_stale() {
        let gauge = SystemMemoryGauge::new(Duration::ZERO);
        *gauge.last.lock() = Some((Instant::now(), 2.0));
        let ratio = gauge.usage_ratio();
        assert!((0.0..=1.0).contains(&ratio));
    }
}
