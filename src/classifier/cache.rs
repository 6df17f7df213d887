//! Result cache keyed by normalised input text.
//!
//! Entries expire a fixed TTL after insertion and are purged lazily on read
//! or in bulk by [`ClassificationCache::sweep`]. Once the bound is exceeded
//! the oldest entries by insertion time are evicted down to 90% of the
//! bound. Hits do not refresh an entry's age.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::types::ClassificationResult;

/// Default time an entry stays valid.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Cache key for an utterance: trimmed and lowercased.
pub fn normalize_key(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ClassificationResult,
    inserted_at: Instant,
    // Tie-breaker for entries inserted at the same instant.
    seq: u64,
}

/// Bounded, TTL-based cache of classification results.
///
/// Not synchronised; the façade guards it with a mutex.
#[derive(Debug)]
pub struct ClassificationCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    next_seq: u64,
}

impl Default for ClassificationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl ClassificationCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
            next_seq: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up a live entry, dropping it if it has expired.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<ClassificationResult> {
        let expired = {
            let entry = self.entries.get(key)?;
            now.saturating_duration_since(entry.inserted_at) >= self.ttl
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.result.clone())
    }

    /// Insert or overwrite an entry. Returns the number of entries evicted.
    pub fn insert(&mut self, key: String, result: ClassificationResult, now: Instant) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
                seq,
            },
        );
        self.evict_overflow()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_overflow(&mut self) -> usize {
        if self.entries.len() <= self.max_entries {
            return 0;
        }
        let target = (self.max_entries * 9 / 10).max(self.max_entries.min(1));
        let excess = self.entries.len() - target;

        let mut by_age: Vec<(Instant, u64, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.inserted_at, entry.seq, key.clone()))
            .collect();
        by_age.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, key) in by_age.into_iter().take(excess) {
            self.entries.remove(&key);
        }
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::types::{ConfidenceLevel, ProcessingMode, Timing};
    use std::collections::BTreeMap;

    fn result(text: &str) -> ClassificationResult {
        ClassificationResult {
            category: "question".into(),
            intent: "answer_question".into(),
            confidence: 0.9,
            parameters: BTreeMap::new(),
            suggestions: Vec::new(),
            raw_text: text.into(),
            normalized_text: normalize_key(text),
            confidence_level: ConfidenceLevel::High,
            requires_confirmation: false,
            context_used: false,
            fallback_used: false,
            cached: false,
            processing_mode: ProcessingMode::Remote,
            timing: Timing::default(),
        }
    }

    #[test]
    fn keys_are_trimmed_and_lowercased() {
        assert_eq!(normalize_key("  What Time IS it?\n"), "what time is it?");
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache = ClassificationCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.insert("a".into(), result("a"), t0);

        assert!(cache.get("a", t0 + Duration::from_secs(9)).is_some());
        assert!(cache.get("a", t0 + Duration::from_secs(10)).is_none());
        // Lazily purged on the expired read.
        assert!(cache.is_empty());
    }

    #[test]
    fn hits_do_not_extend_lifetime() {
        let mut cache = ClassificationCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.insert("a".into(), result("a"), t0);
        for s in 1..10 {
            assert!(cache.get("a", t0 + Duration::from_secs(s)).is_some());
        }
        assert!(cache.get("a", t0 + Duration::from_secs(11)).is_none());
    }

    #[test]
    fn overflow_evicts_oldest_by_insertion() {
        let max = 10;
        let mut cache = ClassificationCache::new(Duration::from_secs(60), max);
        let t0 = Instant::now();
        let mut evicted = 0;
        for i in 0..max + 3 {
            let key = format!("k{i}");
            evicted += cache.insert(key.clone(), result(&key), t0 + Duration::from_millis(i as u64));
            // Touching the first key must not save it.
            let _ = cache.get("k0", t0 + Duration::from_millis(i as u64));
        }

        assert!(cache.len() <= max);
        assert_eq!(evicted, max + 3 - cache.len());
        for i in 0..evicted {
            assert!(!cache.contains(&format!("k{i}")), "k{i} should be evicted");
        }
        for i in evicted..max + 3 {
            assert!(cache.contains(&format!("k{i}")), "k{i} should survive");
        }
    }

    #[test]
    fn same_instant_inserts_evict_in_insertion_order() {
        let mut cache = ClassificationCache::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        cache.insert("first".into(), result("first"), now);
        cache.insert("second".into(), result("second"), now);
        cache.insert("third".into(), result("third"), now);
        assert!(!cache.contains("first"));
        assert!(cache.contains("third"));
    }

    #[test]
    fn overwrite_does_not_grow() {
        let mut cache = ClassificationCache::new(Duration::from_secs(60), 4);
        let now = Instant::now();
        cache.insert("a".into(), result("a"), now);
        cache.insert("a".into(), result("a"), now + Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_drops_only_expired() {
        let mut cache = ClassificationCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.insert("old".into(), result("old"), t0);
        cache.insert("new".into(), result("new"), t0 + Duration::from_secs(8));

        assert_eq!(cache.sweep(t0 + Duration::from_secs(12)), 1);
        assert!(cache.contains("new"));
        assert!(!cache.contains("old"));
    }
}
