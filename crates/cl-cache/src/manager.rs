//! Event cache manager
//!
//! Owns one ring buffer per change group, enforces the global memory budget
//! with priority-aware eviction, runs background age cleanup, answers
//! queries through the result cache, and reports statistics and health.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use cl_core::{
    BridgeEvent, CacheConfig, ChangeEvent, ChangeSet, ControlValue, EventBus, GroupPriority,
    PressureLevel, QueryCacheConfig, time,
};

use crate::query::EventQuery;
use crate::query_cache::QueryCache;
use crate::ring::RingBuffer;
use crate::stats::{
    CacheStatistics, GroupStats, HealthState, HealthStatus, MemoryStats, PerformanceStats,
};

/// Fraction of the limit eviction drives usage back to
const EVICTION_TARGET_FRACTION: f64 = 0.8;
/// Usage percentage where pressure reporting starts
const PRESSURE_HIGH_PERCENT: f64 = 80.0;
const PRESSURE_CRITICAL_PERCENT: f64 = 90.0;

/// Ring plus the per-group last-value map used for previous/delta
struct GroupBuffer {
    ring: RwLock<RingBuffer>,
    last_values: Mutex<HashMap<String, (ControlValue, String)>>,
}

impl GroupBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(RingBuffer::new(capacity)),
            last_values: Mutex::new(HashMap::new()),
        }
    }
}

struct Inner {
    config: CacheConfig,
    bus: Arc<EventBus>,
    groups: RwLock<HashMap<String, Arc<GroupBuffer>>>,
    priorities: RwLock<HashMap<String, GroupPriority>>,
    query_cache: QueryCache,
    next_sequence: AtomicU64,
    total_events: AtomicU64,
    first_event_at: Mutex<Option<Instant>>,
    last_event_ms: AtomicU64,
    error_count: AtomicU64,
    last_error: Mutex<Option<String>>,
    spillover_enabled: AtomicBool,
    /// Last reported pressure level, to emit transitions instead of spam
    pressure_level: Mutex<Option<PressureLevel>>,
    closed: AtomicBool,
}

impl Inner {
    fn priority_of(&self, group_id: &str) -> GroupPriority {
        self.priorities
            .read()
            .get(group_id)
            .copied()
            .unwrap_or_default()
    }

    fn buffer_for(&self, group_id: &str) -> Arc<GroupBuffer> {
        if let Some(buffer) = self.groups.read().get(group_id) {
            return Arc::clone(buffer);
        }
        let mut groups = self.groups.write();
        Arc::clone(
            groups
                .entry(group_id.to_string())
                .or_insert_with(|| Arc::new(GroupBuffer::new(self.config.max_entries))),
        )
    }

    fn total_bytes(&self) -> usize {
        self.groups
            .read()
            .values()
            .map(|buffer| buffer.ring.read().est_bytes())
            .sum()
    }

    fn usage_percent(&self) -> f64 {
        let limit = self.config.max_memory_bytes();
        if limit == 0 {
            return 0.0;
        }
        self.total_bytes() as f64 / limit as f64 * 100.0
    }

    /// Ingest one change set, assigning sequence numbers and deltas
    fn ingest_set(&self, set: &ChangeSet) {
        if set.group_id.is_empty() {
            self.handle_error("Invalid change batch: empty group id", "ingest", None);
            return;
        }
        if set.changes.is_empty() {
            return;
        }

        let buffer = self.buffer_for(&set.group_id);
        {
            let mut ring = buffer.ring.write();
            let mut last_values = buffer.last_values.lock();
            for change in &set.changes {
                let previous = last_values.get(&change.name).cloned();
                let (previous_value, previous_string) = match previous {
                    Some((v, s)) => (Some(v), Some(s)),
                    None => (None, None),
                };
                let delta = previous_value
                    .as_ref()
                    .and_then(|p| change.value.delta_from(p));
                let sequence_number = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;

                last_values.insert(
                    change.name.clone(),
                    (change.value.clone(), change.string.clone()),
                );
                ring.add(ChangeEvent {
                    group_id: set.group_id.clone(),
                    control_name: change.name.clone(),
                    value: change.value.clone(),
                    string: change.string.clone(),
                    previous_value,
                    previous_string,
                    delta,
                    timestamp: set.timestamp,
                    timestamp_ms: set.timestamp_ms,
                    sequence_number,
                });
            }
        }

        self.total_events
            .fetch_add(set.changes.len() as u64, Ordering::Relaxed);
        self.last_event_ms.store(set.timestamp_ms, Ordering::Relaxed);
        self.first_event_at.lock().get_or_insert_with(Instant::now);
        self.query_cache.invalidate_group(&set.group_id);
    }

    /// Ingest an untyped batch; malformed shapes are rejected with an error
    /// event instead of a panic or silent drop
    fn ingest_raw(&self, raw: &Value) {
        let group_id = raw
            .get("groupId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let Some(changes) = raw.get("changes").and_then(|v| v.as_array()) else {
            self.handle_error(
                "Invalid change batch: changes is not an array",
                "ingest",
                if group_id.is_empty() { None } else { Some(&group_id) },
            );
            return;
        };

        let set = ChangeSet {
            group_id,
            changes: changes
                .iter()
                .filter_map(|c| {
                    let name = c.get("name").and_then(|v| v.as_str())?.to_string();
                    let value = ControlValue::from_json(c.get("value")?)?;
                    let string = c
                        .get("string")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| value.display_string());
                    Some(cl_core::ControlChange {
                        name,
                        value,
                        string,
                    })
                })
                .collect(),
            timestamp: raw
                .get("timestamp")
                .and_then(|v| v.as_u64())
                .unwrap_or_else(time::monotonic_ns),
            timestamp_ms: raw
                .get("timestampMs")
                .and_then(|v| v.as_u64())
                .unwrap_or_else(time::wall_ms),
        };
        self.ingest_set(&set);
    }

    /// Central error handler: counters, event, recovery policy
    fn handle_error(&self, message: &str, context: &str, group_id: Option<&str>) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message.to_string());
        log::error!("[Cache] {context}: {message}");

        self.bus.publish(&BridgeEvent::Error {
            message: message.to_string(),
            context: context.to_string(),
            group_id: group_id.map(|g| g.to_string()),
            timestamp_ms: time::wall_ms(),
        });

        let haystack = format!("{context} {message}").to_lowercase();
        if haystack.contains("enospc") || haystack.contains("storage full") {
            if self.spillover_enabled.swap(false, Ordering::SeqCst) {
                log::warn!("[Cache] Spillover disabled after storage-full error");
            }
        } else if haystack.contains("out of memory")
            || haystack.contains("enomem")
            || haystack.contains("oom")
        {
            self.emergency_evict();
        } else if haystack.contains("corrupt") {
            if let Some(group_id) = group_id {
                self.drop_group(group_id);
            }
        }
    }

    fn drop_group(&self, group_id: &str) {
        if self.groups.write().remove(group_id).is_some() {
            self.query_cache.invalidate_group(group_id);
            log::warn!("[Cache] Dropped group buffer '{group_id}'");
        }
    }

    /// Eviction candidates at one priority phase: priority ascending, then
    /// size descending within a priority
    fn candidates(&self, high_phase: bool) -> Vec<(String, Arc<GroupBuffer>)> {
        let groups = self.groups.read();
        let mut list: Vec<(String, Arc<GroupBuffer>, GroupPriority, usize)> = groups
            .iter()
            .filter_map(|(id, buffer)| {
                let priority = self.priority_of(id);
                if (priority == GroupPriority::High) != high_phase {
                    return None;
                }
                let bytes = buffer.ring.read().est_bytes();
                if bytes == 0 {
                    return None;
                }
                Some((id.clone(), Arc::clone(buffer), priority, bytes))
            })
            .collect();
        list.sort_by(|a, b| a.2.cmp(&b.2).then(b.3.cmp(&a.3)));
        list.into_iter().map(|(id, buffer, _, _)| (id, buffer)).collect()
    }

    /// Evict until usage is at or under `target` bytes
    ///
    /// Low and Normal groups first; High-priority groups are only touched
    /// when everything else is drained and the budget is still exceeded.
    fn evict_to_target(&self, target: usize) -> (usize, usize, HashSet<String>) {
        let mut freed = 0usize;
        let mut evicted = 0usize;
        let mut touched = HashSet::new();

        for high_phase in [false, true] {
            loop {
                if self.total_bytes() <= target {
                    return (freed, evicted, touched);
                }
                let candidates = self.candidates(high_phase);
                if candidates.is_empty() {
                    break;
                }
                let mut progressed = false;
                for (id, buffer) in candidates {
                    if self.total_bytes() <= target {
                        break;
                    }
                    let mut ring = buffer.ring.write();
                    let batch = (ring.len() / 10).max(1);
                    let before = ring.est_bytes();
                    let dropped = ring.force_evict(batch);
                    freed += before - ring.est_bytes();
                    evicted += dropped;
                    if dropped > 0 {
                        progressed = true;
                        touched.insert(id);
                    }
                }
                if !progressed {
                    break;
                }
            }
        }
        (freed, evicted, touched)
    }

    /// Drop roughly half of all cached events, lowest priority first
    ///
    /// Works toward a target of half the current usage the same way
    /// [`Inner::evict_to_target`] does: Low and Normal groups are halved
    /// (repeatedly, if needed) first, and High-priority groups are only
    /// touched when that still leaves usage above the target.
    fn emergency_evict(&self) {
        let target = self.total_bytes() / 2;
        let mut total_evicted = 0usize;

        for high_phase in [false, true] {
            loop {
                if self.total_bytes() <= target {
                    break;
                }
                let candidates = self.candidates(high_phase);
                if candidates.is_empty() {
                    break;
                }
                let mut progressed = false;
                for (id, buffer) in candidates {
                    if self.total_bytes() <= target {
                        break;
                    }
                    let mut ring = buffer.ring.write();
                    let half = ring.len().div_ceil(2);
                    let dropped = ring.force_evict(half);
                    drop(ring);
                    if dropped > 0 {
                        progressed = true;
                        total_evicted += dropped;
                        self.query_cache.invalidate_group(&id);
                    }
                }
                if !progressed {
                    break;
                }
            }
            if self.total_bytes() <= target {
                break;
            }
        }

        log::warn!("[Cache] Emergency eviction dropped {total_evicted} events");
        self.bus.publish(&BridgeEvent::EmergencyEviction {
            total_evicted,
            timestamp_ms: time::wall_ms(),
        });
    }

    /// One memory-budget pass: pressure events and, over the limit, eviction
    fn run_memory_check(&self) {
        let limit = self.config.max_memory_bytes();
        if limit == 0 {
            return;
        }

        let total = self.total_bytes();
        let percentage = total as f64 / limit as f64 * 100.0;

        let level = if percentage >= PRESSURE_CRITICAL_PERCENT {
            Some(PressureLevel::Critical)
        } else if percentage >= PRESSURE_HIGH_PERCENT {
            Some(PressureLevel::High)
        } else {
            None
        };

        {
            let mut current = self.pressure_level.lock();
            if level != *current {
                if let Some(level) = level {
                    self.bus.publish(&BridgeEvent::MemoryPressure {
                        level,
                        percentage,
                        total_usage: total,
                    });
                    log::warn!(
                        "[Cache] Memory pressure {level:?}: {percentage:.1}% of {limit} bytes"
                    );
                }
                *current = level;
            }
        }

        if total >= limit {
            let target = (limit as f64 * EVICTION_TARGET_FRACTION) as usize;
            let (freed, evicted, touched) = self.evict_to_target(target);
            for group_id in &touched {
                self.query_cache.invalidate_group(group_id);
            }

            let current_usage = self.total_bytes();
            log::info!(
                "[Cache] Evicted {evicted} events ({freed} bytes), usage now {current_usage}"
            );
            if (current_usage as f64) < limit as f64 * PRESSURE_HIGH_PERCENT / 100.0 {
                self.bus.publish(&BridgeEvent::MemoryPressureResolved {
                    freed,
                    current_usage,
                });
                *self.pressure_level.lock() = None;
            }
        }
    }

    /// One age-cleanup pass over every group
    fn run_age_cleanup(&self) {
        if self.config.ttl_ms == 0 {
            return;
        }
        let now_ms = time::wall_ms();
        let mut total_evicted = 0usize;
        let groups: Vec<(String, Arc<GroupBuffer>)> = self
            .groups
            .read()
            .iter()
            .map(|(id, buffer)| (id.clone(), Arc::clone(buffer)))
            .collect();

        for (id, buffer) in groups {
            let evicted = buffer
                .ring
                .write()
                .evict_older_than(self.config.ttl_ms, now_ms);
            if evicted > 0 {
                total_evicted += evicted;
                self.query_cache.invalidate_group(&id);
            }
        }

        if total_evicted > 0 {
            self.bus.publish(&BridgeEvent::Cleanup { total_evicted });
        }
    }
}

/// Cache manager handle
pub struct EventCacheManager {
    inner: Arc<Inner>,
    tickers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    ingest_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl EventCacheManager {
    pub fn new(
        bus: Arc<EventBus>,
        config: CacheConfig,
        query_config: &QueryCacheConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                query_cache: QueryCache::new(query_config),
                bus,
                groups: RwLock::new(HashMap::new()),
                priorities: RwLock::new(HashMap::new()),
                next_sequence: AtomicU64::new(0),
                total_events: AtomicU64::new(0),
                first_event_at: Mutex::new(None),
                last_event_ms: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                last_error: Mutex::new(None),
                spillover_enabled: AtomicBool::new(true),
                pressure_level: Mutex::new(None),
                closed: AtomicBool::new(false),
                config,
            }),
            tickers: Mutex::new(Vec::new()),
            ingest_thread: Mutex::new(None),
        }
    }

    /// Subscribe to poller emissions and start the background tickers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        // Ingestion runs on a dedicated thread so a slow consumer can never
        // block the bus or the runtime
        let subscription = self.inner.bus.subscribe_with_capacity(1024);
        let inner = Arc::clone(&self.inner);
        let thread = std::thread::spawn(move || {
            loop {
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                match subscription.recv_timeout(Duration::from_millis(100)) {
                    Some(BridgeEvent::ChangeGroupChanges(set)) => inner.ingest_set(&set),
                    Some(_) | None => {}
                }
            }
        });
        *self.ingest_thread.lock() = Some(thread);

        let mut tickers = self.tickers.lock();

        if self.inner.config.max_memory_bytes() > 0 {
            let inner = Arc::clone(&self.inner);
            let period = Duration::from_millis(self.inner.config.memory_check_interval_ms.max(1));
            tickers.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    if inner.closed.load(Ordering::Acquire) {
                        break;
                    }
                    inner.run_memory_check();
                }
            }));
        }

        if self.inner.config.ttl_ms > 0 {
            let inner = Arc::clone(&self.inner);
            let period = Duration::from_millis(self.inner.config.cleanup_interval_ms.max(1));
            tickers.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    if inner.closed.load(Ordering::Acquire) {
                        break;
                    }
                    inner.run_age_cleanup();
                }
            }));
        }
    }

    /// Ingest a change set directly
    pub fn ingest(&self, set: &ChangeSet) {
        self.inner.ingest_set(set);
    }

    /// Ingest an untyped batch, validating its shape
    pub fn ingest_raw(&self, raw: &Value) {
        self.inner.ingest_raw(raw);
    }

    /// Report an error through the central handler
    pub fn handle_error(&self, message: &str, context: &str, group_id: Option<&str>) {
        self.inner.handle_error(message, context, group_id);
    }

    /// Query cached events
    pub fn query(&self, query: &EventQuery) -> Vec<ChangeEvent> {
        let key = query.canonical_key();
        if let Some(events) = self.inner.query_cache.get(&key) {
            return events;
        }

        let from = query.start_time.unwrap_or(0);
        let to = query.end_time.unwrap_or(u64::MAX);
        let mut touched = HashSet::new();
        let mut events = Vec::new();
        {
            let groups = self.inner.groups.read();
            for (id, buffer) in groups.iter() {
                if let Some(wanted) = &query.group_id
                    && wanted != id
                {
                    continue;
                }
                touched.insert(id.clone());
                events.extend(buffer.ring.read().query_time_range(from, to));
            }
        }

        let out = query.apply(events);
        self.inner.query_cache.put(key, out.clone(), touched);
        out
    }

    /// Set a group's eviction priority
    pub fn set_group_priority(&self, group_id: &str, priority: GroupPriority) {
        self.inner
            .priorities
            .write()
            .insert(group_id.to_string(), priority);
    }

    /// Statistics, optionally narrowed to one group
    pub fn get_statistics(&self, group_id: Option<&str>) -> CacheStatistics {
        let groups = self.inner.groups.read();
        let mut group_stats = Vec::new();
        let mut event_count = 0usize;

        for (id, buffer) in groups.iter() {
            if let Some(wanted) = group_id
                && wanted != id
            {
                continue;
            }
            let ring = buffer.ring.read();
            event_count += ring.len();
            group_stats.push(GroupStats {
                id: id.clone(),
                event_count: ring.len(),
                est_bytes: ring.est_bytes(),
                priority: self.inner.priority_of(id),
                oldest_timestamp: ring.oldest_timestamp(),
                newest_timestamp: ring.newest_timestamp(),
            });
        }
        drop(groups);
        group_stats.sort_by(|a, b| a.id.cmp(&b.id));

        let total_bytes = self.inner.total_bytes();
        let limit_bytes = self.inner.config.max_memory_bytes();
        let total_events = self.inner.total_events.load(Ordering::Relaxed);
        let events_per_second = self
            .inner
            .first_event_at
            .lock()
            .map(|t| {
                let secs = t.elapsed().as_secs_f64();
                if secs > 0.0 {
                    total_events as f64 / secs
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        let last_event_ms = match self.inner.last_event_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        };

        CacheStatistics {
            total_events,
            event_count,
            group_count: group_stats.len(),
            memory: MemoryStats {
                total_bytes,
                limit_bytes,
                usage_percent: self.inner.usage_percent(),
            },
            groups: group_stats,
            performance: PerformanceStats {
                events_per_second,
                last_event_ms,
            },
            query_cache: self.inner.query_cache.stats(),
        }
    }

    /// Health classification from memory usage and recovery state
    pub fn get_health_status(&self) -> HealthStatus {
        let memory_usage_percent = self.inner.usage_percent();
        let error_count = self.inner.error_count.load(Ordering::Relaxed);
        let mut issues = Vec::new();

        if memory_usage_percent >= PRESSURE_CRITICAL_PERCENT {
            issues.push(format!("memory usage critical: {memory_usage_percent:.1}%"));
        } else if memory_usage_percent >= PRESSURE_HIGH_PERCENT {
            issues.push(format!("memory usage high: {memory_usage_percent:.1}%"));
        }
        if !self.inner.spillover_enabled.load(Ordering::Relaxed) {
            issues.push("spillover disabled after storage-full error".to_string());
        }

        let status = if memory_usage_percent >= PRESSURE_CRITICAL_PERCENT {
            HealthState::Unhealthy
        } else if !issues.is_empty() {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthStatus {
            status,
            memory_usage_percent,
            error_count,
            last_error: self.inner.last_error.lock().clone(),
            issues,
        }
    }

    /// Clear derived caches: query results and last-value maps
    ///
    /// Event history stays; only state that could disagree with a changed
    /// topology is dropped.
    pub fn clear_all_caches(&self) {
        self.inner.query_cache.clear();
        for buffer in self.inner.groups.read().values() {
            buffer.last_values.lock().clear();
        }
        log::info!("[Cache] Query cache and last-value maps cleared");
    }

    /// Bytes currently charged against the budget
    pub fn total_bytes(&self) -> usize {
        self.inner.total_bytes()
    }

    /// Run one memory-budget pass now (the ticker calls this periodically)
    pub fn run_memory_check(&self) {
        self.inner.run_memory_check();
    }

    /// Run one age-cleanup pass now
    pub fn run_age_cleanup(&self) {
        self.inner.run_age_cleanup();
    }

    /// Stop tickers and ingestion, then release every buffer
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for ticker in self.tickers.lock().drain(..) {
            ticker.abort();
        }
        if let Some(thread) = self.ingest_thread.lock().take() {
            // The ingest loop wakes at least every 100 ms; one join covers
            // the 1 s drain grace
            let _ = thread.join();
        }
        self.inner.groups.write().clear();
        self.inner.query_cache.clear();
        log::info!("[Cache] Closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_core::ControlChange;
    use serde_json::json;

    fn manager_with(config: CacheConfig) -> EventCacheManager {
        EventCacheManager::new(
            Arc::new(EventBus::new()),
            config,
            &QueryCacheConfig::default(),
        )
    }

    fn manager() -> EventCacheManager {
        manager_with(CacheConfig::default())
    }

    fn set(group: &str, names_values: &[(&str, f64)], timestamp: u64) -> ChangeSet {
        ChangeSet {
            group_id: group.to_string(),
            changes: names_values
                .iter()
                .map(|(name, value)| {
                    ControlChange::new(name.to_string(), ControlValue::Number(*value))
                })
                .collect(),
            timestamp,
            timestamp_ms: timestamp / 1_000_000,
        }
    }

    fn fill(manager: &EventCacheManager, group: &str, count: usize) {
        for i in 0..count {
            manager.ingest(&set(
                group,
                &[("A.x", i as f64)],
                (i as u64 + 1) * 1_000_000,
            ));
        }
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let m = manager();
        m.ingest(&set("g", &[("A.x", 1.0), ("A.y", 2.0)], 1_000));
        m.ingest(&set("g", &[("A.x", 3.0)], 2_000));

        let events = m.query(&EventQuery {
            group_id: Some("g".into()),
            ..Default::default()
        });
        assert_eq!(events.len(), 3);
        let seqs: Vec<u64> = events.iter().map(|e| e.sequence_number).collect();
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
        let stamps: Vec<u64> = events.iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn test_previous_value_and_delta() {
        let m = manager();
        m.ingest(&set("g", &[("A.x", -40.0)], 1_000));
        m.ingest(&set("g", &[("A.x", -10.0)], 2_000));

        let events = m.query(&EventQuery::default());
        assert_eq!(events[0].previous_value, None);
        assert_eq!(events[0].delta, None);
        assert_eq!(events[1].previous_value, Some(ControlValue::Number(-40.0)));
        assert_eq!(events[1].delta, Some(30.0));
    }

    #[test]
    fn test_raw_batch_with_bad_changes_emits_error() {
        let m = manager();
        let sub = m.inner.bus.subscribe();

        m.ingest_raw(&json!({ "groupId": "g", "changes": "not-an-array" }));

        match sub.try_recv() {
            Some(BridgeEvent::Error {
                message, group_id, ..
            }) => {
                assert!(message.contains("not an array"));
                assert_eq!(group_id.as_deref(), Some("g"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(m.get_health_status().error_count, 1);
    }

    #[test]
    fn test_raw_batch_valid_shape() {
        let m = manager();
        m.ingest_raw(&json!({
            "groupId": "g",
            "changes": [{ "name": "A.x", "value": 3.5, "string": "3.5" }],
            "timestamp": 5_000,
            "timestampMs": 1
        }));
        let events = m.query(&EventQuery::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, ControlValue::Number(3.5));
    }

    #[test]
    fn test_query_cache_hit_and_invalidation() {
        let m = manager();
        m.ingest(&set("g", &[("A.x", 1.0)], 1_000));

        let q = EventQuery {
            group_id: Some("g".into()),
            ..Default::default()
        };
        assert_eq!(m.query(&q).len(), 1);
        assert_eq!(m.query(&q).len(), 1);
        let stats = m.get_statistics(None);
        assert_eq!(stats.query_cache.hits, 1);
        assert_eq!(stats.query_cache.misses, 1);

        // New events for the group invalidate the entry
        m.ingest(&set("g", &[("A.x", 2.0)], 2_000));
        assert_eq!(m.query(&q).len(), 2);
    }

    #[test]
    fn test_memory_pressure_and_priority_eviction() {
        // 1 MiB budget, rings big enough to overflow it
        let mut config = CacheConfig::default();
        config.max_memory_mb = 1;
        config.max_entries = 10_000;
        let m = manager_with(config);
        let sub = m.inner.bus.subscribe_with_capacity(16);

        m.set_group_priority("hi", GroupPriority::High);
        m.set_group_priority("lo", GroupPriority::Low);
        fill(&m, "hi", 3_000);
        fill(&m, "lo", 3_000);
        assert!(m.total_bytes() > 1024 * 1024);

        m.run_memory_check();

        let events = sub.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, BridgeEvent::MemoryPressure { level: PressureLevel::Critical, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, BridgeEvent::MemoryPressureResolved { .. })));

        // Back under the high watermark, low priority paid the price
        let limit = 1024 * 1024;
        assert!(m.total_bytes() <= (limit as f64 * 0.8) as usize + 1024);
        let stats = m.get_statistics(None);
        let hi = stats.groups.iter().find(|g| g.id == "hi").unwrap();
        let lo = stats.groups.iter().find(|g| g.id == "lo").unwrap();
        assert!(hi.event_count >= lo.event_count);
    }

    #[test]
    fn test_high_priority_evicted_only_as_last_resort() {
        let mut config = CacheConfig::default();
        config.max_memory_mb = 1;
        config.max_entries = 10_000;
        let m = manager_with(config);

        m.set_group_priority("hi", GroupPriority::High);
        m.set_group_priority("lo", GroupPriority::Low);
        // Low alone cannot free enough: High holds most of the data
        fill(&m, "hi", 6_000);
        fill(&m, "lo", 200);

        m.run_memory_check();

        let stats = m.get_statistics(None);
        let lo = stats.groups.iter().find(|g| g.id == "lo").unwrap();
        assert_eq!(lo.event_count, 0, "low priority should be drained first");
        assert!(m.total_bytes() <= (1024.0 * 1024.0 * 0.8) as usize + 1024);
    }

    #[test]
    fn test_age_cleanup_emits_total() {
        let mut config = CacheConfig::default();
        config.ttl_ms = 1; // everything expires immediately
        let m = manager_with(config);
        let sub = m.inner.bus.subscribe();

        m.ingest(&set("g", &[("A.x", 1.0)], 1_000));
        std::thread::sleep(Duration::from_millis(5));
        m.run_age_cleanup();

        match sub.drain().last() {
            Some(BridgeEvent::Cleanup { total_evicted }) => assert_eq!(*total_evicted, 1),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(m.get_statistics(None).event_count, 0);
    }

    #[test]
    fn test_age_cleanup_disabled_when_ttl_zero() {
        let mut config = CacheConfig::default();
        config.ttl_ms = 0;
        let m = manager_with(config);
        m.ingest(&set("g", &[("A.x", 1.0)], 1_000));
        m.run_age_cleanup();
        assert_eq!(m.get_statistics(None).event_count, 1);
    }

    #[test]
    fn test_out_of_memory_triggers_emergency_eviction() {
        let m = manager();
        let sub = m.inner.bus.subscribe_with_capacity(16);
        fill(&m, "g", 100);

        m.handle_error("allocation failed: out of memory", "ingest", None);

        let events = sub.drain();
        let emergency = events
            .iter()
            .find_map(|e| match e {
                BridgeEvent::EmergencyEviction { total_evicted, .. } => Some(*total_evicted),
                _ => None,
            })
            .expect("emergency eviction event");
        assert_eq!(emergency, 50);
        assert_eq!(m.get_statistics(None).event_count, 50);
    }

    #[test]
    fn test_emergency_eviction_spares_high_priority_when_possible() {
        let m = manager();
        m.set_group_priority("hi", GroupPriority::High);
        m.set_group_priority("lo", GroupPriority::Low);
        fill(&m, "hi", 100);
        fill(&m, "lo", 100);

        m.handle_error("ingest failed: out of memory", "ingest", None);

        let stats = m.get_statistics(None);
        let hi = stats.groups.iter().find(|g| g.id == "hi").unwrap();
        let lo = stats.groups.iter().find(|g| g.id == "lo").unwrap();
        assert_eq!(hi.event_count, 100, "high priority must not be touched");
        assert!(lo.event_count < 10, "low priority pays: {}", lo.event_count);
        // Usage landed at roughly half
        assert!(stats.event_count <= 110);
    }

    #[test]
    fn test_corruption_drops_group() {
        let m = manager();
        fill(&m, "good", 5);
        fill(&m, "bad", 5);

        m.handle_error("buffer corrupt beyond recovery", "read", Some("bad"));

        let stats = m.get_statistics(None);
        assert_eq!(stats.group_count, 1);
        assert_eq!(stats.groups[0].id, "good");
    }

    #[test]
    fn test_storage_full_disables_spillover() {
        let m = manager();
        m.handle_error("write failed: ENOSPC", "spill", None);
        let health = m.get_health_status();
        assert_eq!(health.status, HealthState::Degraded);
        assert!(health.issues.iter().any(|i| i.contains("spillover")));
    }

    #[test]
    fn test_statistics_shape() {
        let m = manager();
        fill(&m, "a", 3);
        fill(&m, "b", 2);

        let all = m.get_statistics(None);
        assert_eq!(all.total_events, 5);
        assert_eq!(all.event_count, 5);
        assert_eq!(all.group_count, 2);
        assert!(all.memory.limit_bytes > 0);

        let one = m.get_statistics(Some("a"));
        assert_eq!(one.group_count, 1);
        assert_eq!(one.groups[0].event_count, 3);
        // Totals are manager-wide regardless of the filter
        assert_eq!(one.total_events, 5);
    }

    #[test]
    fn test_healthy_by_default() {
        let m = manager();
        let health = m.get_health_status();
        assert_eq!(health.status, HealthState::Healthy);
        assert!(health.issues.is_empty());
        assert_eq!(health.error_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bus_ingestion_end_to_end() {
        let bus = Arc::new(EventBus::new());
        let m = EventCacheManager::new(
            Arc::clone(&bus),
            CacheConfig::default(),
            &QueryCacheConfig::default(),
        );
        m.start();

        bus.publish(&BridgeEvent::ChangeGroupChanges(set(
            "g",
            &[("A.x", 1.0)],
            1_000,
        )));

        // The ingest thread polls every 100 ms
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(m.get_statistics(None).event_count, 1);

        m.close();
        // After close the buffers are gone
        assert_eq!(m.get_statistics(None).group_count, 0);
    }
}
