//! Prefix memoization for peek inference.
//!
//! Keys are ordered sequences of surviving input labels; values are the full
//! (input + internal) event sequence previously inferred for that prefix.
//! Views derived during one minimization run share a single cache, so a
//! prefix inferred while evaluating one candidate is reused by every later
//! candidate that starts with the same inputs.
//!
//! The cache is append-only: an inserted prefix is never overwritten.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use culprit_types::{Event, Label};

/// Result of a longest-prefix lookup.
#[derive(Debug, Clone)]
pub struct PrefixMatch {
    /// Number of leading keys matched.
    pub len: usize,
    /// Events inferred for the matched prefix.
    pub events: Vec<Arc<Event>>,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<Label, usize>,
    value: Option<Vec<Arc<Event>>>,
}

/// Trie from input-label sequences to inferred event sequences.
#[derive(Debug)]
pub struct PrefixCache {
    nodes: Vec<TrieNode>,
    entries: usize,
}

impl Default for PrefixCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixCache {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            entries: 0,
        }
    }

    /// Finds the longest non-empty prefix of `keys` that has a value.
    pub fn longest_match(&self, keys: &[Label]) -> Option<PrefixMatch> {
        let mut node = 0;
        let mut best = None;

        for (depth, key) in keys.iter().enumerate() {
            let Some(&child) = self.nodes[node].children.get(key) else {
                break;
            };
            node = child;
            if let Some(events) = &self.nodes[node].value {
                best = Some(PrefixMatch {
                    len: depth + 1,
                    events: events.clone(),
                });
            }
        }

        best
    }

    /// Stores `events` under `keys` unless a value is already present.
    ///
    /// Returns true if the value was stored.
    pub fn insert(&mut self, keys: &[Label], events: Vec<Arc<Event>>) -> bool {
        let mut node = 0;
        for key in keys {
            node = match self.nodes[node].children.get(key) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(*key, child);
                    child
                }
            };
        }

        if self.nodes[node].value.is_some() {
            return false;
        }
        self.nodes[node].value = Some(events);
        self.entries += 1;
        true
    }

    /// Number of stored prefixes.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

// ============================================================================
// Shared Cache
// ============================================================================

/// Lookup counters for a shared cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cloneable handle to a [`PrefixCache`] shared by a family of views.
///
/// Lookups take the read lock; inserts take a short-lived write lock.
#[derive(Debug, Clone, Default)]
pub struct SharedPrefixCache {
    inner: Arc<RwLock<PrefixCache>>,
    counters: Arc<Counters>,
}

impl SharedPrefixCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn longest_match(&self, keys: &[Label]) -> Option<PrefixMatch> {
        let found = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .longest_match(keys);

        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, keys: &[Label], events: Vec<Arc<Event>>) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(keys, events)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Returns true if both handles refer to the same cache.
    pub fn ptr_eq(&self, other: &SharedPrefixCache) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use culprit_types::{InputEvent, InputKind, Timestamp};
    use proptest::prelude::*;

    fn labels(ids: &[u64]) -> Vec<Label> {
        ids.iter().copied().map(Label::new).collect()
    }

    fn events(ids: &[u64]) -> Vec<Arc<Event>> {
        ids.iter()
            .map(|&id| {
                Arc::new(Event::input(
                    Label::new(id),
                    Timestamp::from_secs(id),
                    InputEvent::new(InputKind::Custom {
                        class: format!("i{id}"),
                    }),
                ))
            })
            .collect()
    }

    fn event_labels(events: &[Arc<Event>]) -> Vec<u64> {
        events.iter().map(|e| e.label.as_u64()).collect()
    }

    #[test]
    fn empty_cache_has_no_match() {
        let cache = PrefixCache::new();
        assert!(cache.longest_match(&labels(&[1, 2])).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn longest_match_prefers_deepest_value() {
        let mut cache = PrefixCache::new();
        cache.insert(&labels(&[1]), events(&[1]));
        cache.insert(&labels(&[1, 2]), events(&[1, 2]));

        let found = cache.longest_match(&labels(&[1, 2, 3])).unwrap();
        assert_eq!(found.len, 2);
        assert_eq!(event_labels(&found.events), vec![1, 2]);
    }

    #[test]
    fn interior_node_without_value_is_skipped() {
        let mut cache = PrefixCache::new();
        cache.insert(&labels(&[1, 2, 3]), events(&[1, 2, 3]));

        assert!(cache.longest_match(&labels(&[1, 2])).is_none());
        assert_eq!(cache.longest_match(&labels(&[1, 2, 3, 4])).unwrap().len, 3);
    }

    #[test]
    fn insert_never_overwrites() {
        let mut cache = PrefixCache::new();
        assert!(cache.insert(&labels(&[1]), events(&[1])));
        assert!(!cache.insert(&labels(&[1]), events(&[9])));

        let found = cache.longest_match(&labels(&[1])).unwrap();
        assert_eq!(event_labels(&found.events), vec![1]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn diverging_prefixes_do_not_match() {
        let mut cache = PrefixCache::new();
        cache.insert(&labels(&[1, 2]), events(&[1, 2]));
        assert!(cache.longest_match(&labels(&[2, 1])).is_none());
    }

    #[test]
    fn shared_cache_counts_hits_and_misses() {
        let cache = SharedPrefixCache::new();
        let clone = cache.clone();
        assert!(cache.ptr_eq(&clone));

        assert!(cache.longest_match(&labels(&[1])).is_none());
        clone.insert(&labels(&[1]), events(&[1]));
        assert!(cache.longest_match(&labels(&[1])).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    proptest! {
        #[test]
        fn longest_match_agrees_with_linear_scan(
            inserted in prop::collection::vec(prop::collection::vec(0u64..4, 1..5), 0..8),
            query in prop::collection::vec(0u64..4, 0..6),
        ) {
            let mut cache = PrefixCache::new();
            for keys in &inserted {
                cache.insert(&labels(keys), events(keys));
            }

            let expected = (1..=query.len())
                .rev()
                .find(|&n| inserted.iter().any(|keys| keys.as_slice() == &query[..n]));

            let found = cache.longest_match(&labels(&query)).map(|m| m.len);
            prop_assert_eq!(found, expected);
        }
    }
}
