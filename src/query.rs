//! Incremental query engine.
//!
//! Every exported function of the resolution core is a query: a pure
//! function of `(context, key)` whose result is memoized for the current
//! revision. The engine provides three primitives:
//!
//! - `begin` / `end` markers that cache the result under the key,
//! - `is_running` to detect re-entrance (used to break recursion in
//!   genericity analysis and on-demand body resolution),
//! - `store` to write a result from inside another query (used by
//!   initializer resolution, which discovers the actual signature only
//!   after entering the query for a provisional one).
//!
//! Cycle handling is explicit: a caller that observes `AlreadyRunning`
//! returns a sentinel instead of recursing. Within a revision, re-running
//! a query with the same key is a side-effect-free lookup. Bumping the
//! revision logically invalidates every cached entry; stale entries are
//! replaced lazily on the next write.

use dashmap::DashMap;
use std::hash::Hash;

#[derive(Clone, Debug)]
enum QueryState<V> {
    Running,
    Done(V),
}

#[derive(Clone, Debug)]
struct QueryEntry<V> {
    revision: u64,
    state: QueryState<V>,
}

/// Outcome of `begin`.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryStatus<V> {
    /// A result is already cached for this revision.
    Cached(V),
    /// The running marker was installed; the caller computes and must
    /// `end` (or `store` + `end`).
    Started,
    /// The same query with the same key is already running.
    AlreadyRunning,
}

/// One memo table, keyed by the query's key tuple.
pub struct QueryCache<K, V> {
    map: DashMap<K, QueryEntry<V>, rustc_hash::FxBuildHasher>,
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        QueryCache {
            map: DashMap::default(),
        }
    }

    pub fn cached(&self, revision: u64, key: &K) -> Option<V> {
        let entry = self.map.get(key)?;
        if entry.revision != revision {
            return None;
        }
        match &entry.state {
            QueryState::Done(v) => Some(v.clone()),
            QueryState::Running => None,
        }
    }

    pub fn is_running(&self, revision: u64, key: &K) -> bool {
        self.map
            .get(key)
            .is_some_and(|e| e.revision == revision && matches!(e.state, QueryState::Running))
    }

    pub fn begin(&self, revision: u64, key: K) -> QueryStatus<V> {
        let mut replaced = QueryStatus::Started;
        self.map
            .entry(key)
            .and_modify(|entry| {
                if entry.revision == revision {
                    match &entry.state {
                        QueryState::Done(v) => replaced = QueryStatus::Cached(v.clone()),
                        QueryState::Running => replaced = QueryStatus::AlreadyRunning,
                    }
                } else {
                    *entry = QueryEntry {
                        revision,
                        state: QueryState::Running,
                    };
                }
            })
            .or_insert(QueryEntry {
                revision,
                state: QueryState::Running,
            });
        replaced
    }

    /// Complete the query. If a result was already stored for this
    /// revision (via `store`), the stored value wins and is returned, so
    /// callers always read the final value through the key.
    pub fn end(&self, revision: u64, key: K, value: V) -> V {
        let mut result = value;
        let mut entry = self.map.entry(key).or_insert(QueryEntry {
            revision,
            state: QueryState::Running,
        });
        if entry.revision == revision {
            if let QueryState::Done(existing) = &entry.state {
                result = existing.clone();
            } else {
                entry.state = QueryState::Done(result.clone());
            }
        } else {
            *entry = QueryEntry {
                revision,
                state: QueryState::Done(result.clone()),
            };
        }
        result
    }

    /// Explicitly store a result, replacing a running marker if present.
    /// An existing completed result for this revision is kept.
    pub fn store(&self, revision: u64, key: K, value: V) {
        let mut entry = self.map.entry(key).or_insert(QueryEntry {
            revision,
            state: QueryState::Running,
        });
        if entry.revision == revision {
            if !matches!(entry.state, QueryState::Done(_)) {
                entry.state = QueryState::Done(value);
            }
        } else {
            *entry = QueryEntry {
                revision,
                state: QueryState::Done(value),
            };
        }
    }
}

impl<K, V> Default for QueryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_end_caches() {
        let cache: QueryCache<u32, String> = QueryCache::new();
        assert_eq!(cache.begin(1, 7), QueryStatus::Started);
        assert!(cache.is_running(1, &7));
        let v = cache.end(1, 7, "seven".to_string());
        assert_eq!(v, "seven");
        assert_eq!(cache.begin(1, 7), QueryStatus::Cached("seven".to_string()));
        assert!(!cache.is_running(1, &7));
    }

    #[test]
    fn test_reentrance_detected() {
        let cache: QueryCache<u32, u32> = QueryCache::new();
        assert_eq!(cache.begin(1, 1), QueryStatus::Started);
        assert_eq!(cache.begin(1, 1), QueryStatus::AlreadyRunning);
    }

    #[test]
    fn test_store_wins_over_end() {
        let cache: QueryCache<u32, u32> = QueryCache::new();
        assert_eq!(cache.begin(1, 1), QueryStatus::Started);
        cache.store(1, 1, 42);
        // the provisional value computed by the query body loses
        let v = cache.end(1, 1, 7);
        assert_eq!(v, 42);
        assert_eq!(cache.cached(1, &1), Some(42));
    }

    #[test]
    fn test_revision_invalidates() {
        let cache: QueryCache<u32, u32> = QueryCache::new();
        cache.begin(1, 1);
        cache.end(1, 1, 10);
        assert_eq!(cache.cached(1, &1), Some(10));
        assert_eq!(cache.cached(2, &1), None);
        assert_eq!(cache.begin(2, 1), QueryStatus::Started);
        cache.end(2, 1, 20);
        assert_eq!(cache.cached(2, &1), Some(20));
    }
}
