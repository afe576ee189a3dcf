//! Query result cache
//!
//! Small LRU over recent query results, keyed by the canonicalized query.
//! Entries are tagged with the groups they were computed from; new events for
//! a group invalidate every entry carrying its tag.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cl_core::{ChangeEvent, QueryCacheConfig};

/// Hit/miss counters reported in statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

struct CacheEntry {
    events: Vec<ChangeEvent>,
    group_ids: HashSet<String>,
    inserted_at: Instant,
    /// Monotonic recency stamp for LRU eviction
    last_used: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
    hits: u64,
    misses: u64,
}

/// Bounded LRU cache with TTL
pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl QueryCache {
    pub fn new(config: &QueryCacheConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            ttl: Duration::from_millis(config.ttl_ms),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Look a query result up; counts the hit or miss
    pub fn get(&self, key: &str) -> Option<Vec<ChangeEvent>> {
        let mut state = self.state.lock();
        state.clock += 1;
        let clock = state.clock;

        let expired = match state.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => {
                state.misses += 1;
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            state.misses += 1;
            return None;
        }

        let entry = state.entries.get_mut(key).expect("checked above");
        entry.last_used = clock;
        let events = entry.events.clone();
        state.hits += 1;
        Some(events)
    }

    /// Store a result tagged with the groups it came from
    pub fn put(&self, key: String, events: Vec<ChangeEvent>, group_ids: HashSet<String>) {
        let mut state = self.state.lock();
        state.clock += 1;
        let clock = state.clock;

        state.entries.insert(
            key,
            CacheEntry {
                events,
                group_ids,
                inserted_at: Instant::now(),
                last_used: clock,
            },
        );

        // LRU eviction when over capacity
        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Drop every entry computed from `group_id`
    pub fn invalidate_group(&self, group_id: &str) {
        self.state
            .lock()
            .entries
            .retain(|_, entry| !entry.group_ids.contains(group_id));
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn stats(&self) -> QueryCacheStats {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        QueryCacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                state.hits as f64 / total as f64
            },
            size: state.entries.len(),
        }
    }
}
