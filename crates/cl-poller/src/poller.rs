//! Change-group poller
//!
//! Drives periodic batched reads through the `ControlSystem` and emits one
//! `ChangeGroup.Changes` envelope per tick with the controls whose values
//! moved. Below the high-frequency cutoff the timer self-schedules at
//! `max(1, interval - elapsed)` so slow reads shorten the idle gap instead of
//! stretching the period; an interval scheduler that awaited the read would
//! be bounded by the read, not the interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use cl_core::{
    BridgeEvent, ChangeSet, ClError, ClResult, ControlChange, ControlSystem, EventBus, time,
};

use crate::group::{GroupInfo, GroupMode, GroupState};

/// Named change groups with dual-mode timers
pub struct PollerEngine {
    system: Arc<dyn ControlSystem>,
    bus: Arc<EventBus>,
    groups: Mutex<HashMap<String, Arc<GroupState>>>,
    cutoff_ms: u64,
}

impl PollerEngine {
    pub fn new(system: Arc<dyn ControlSystem>, bus: Arc<EventBus>, cutoff_ms: u64) -> Self {
        Self {
            system,
            bus,
            groups: Mutex::new(HashMap::new()),
            cutoff_ms,
        }
    }

    /// The bus this poller publishes to
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    fn get(&self, id: &str) -> ClResult<Arc<GroupState>> {
        self.groups
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ClError::NotFound(format!("Change group not found: {id}")))
    }

    /// Create a new group; fails when the id is taken
    pub fn create(&self, id: &str) -> ClResult<()> {
        if id.trim().is_empty() {
            return Err(ClError::InvalidArgument(
                "Change group id must not be empty".to_string(),
            ));
        }
        let mut groups = self.groups.lock();
        if groups.contains_key(id) {
            return Err(ClError::AlreadyExists(format!(
                "Change group already exists: {id}"
            )));
        }
        groups.insert(id.to_string(), Arc::new(GroupState::new(id)));
        log::debug!("[Poller] Created change group '{id}'");
        Ok(())
    }

    /// Subscribe controls; returns how many were actually added
    pub fn add_controls(&self, id: &str, names: &[String]) -> ClResult<usize> {
        Ok(self.get(id)?.add_controls(names))
    }

    /// Unsubscribe controls; returns how many were present
    pub fn remove_controls(&self, id: &str, names: &[String]) -> ClResult<usize> {
        Ok(self.get(id)?.remove_controls(names))
    }

    /// Drop all subscriptions of a group
    pub fn clear(&self, id: &str) -> ClResult<()> {
        self.get(id)?.clear();
        Ok(())
    }

    /// Destroy a group: cancel its timer, invalidate in-flight ticks,
    /// release observations. Synchronous and idempotent.
    pub fn destroy(&self, id: &str) {
        if let Some(group) = self.groups.lock().remove(id) {
            group.kill();
            log::debug!("[Poller] Destroyed change group '{id}'");
        }
    }

    /// Enable or disable automatic polling
    ///
    /// Idempotent. Disabling tears the timer down within one interval; the
    /// generation bump invalidates the running task even mid-sleep.
    pub fn set_auto_poll(
        &self,
        id: &str,
        enabled: bool,
        interval_ms: Option<u64>,
    ) -> ClResult<()> {
        let group = self.get(id)?;
        if let Some(ms) = interval_ms {
            group.set_interval_ms(ms);
        }

        if enabled {
            let generation = group.bump_generation();
            group.set_auto_poll(true);
            let system = Arc::clone(&self.system);
            let bus = Arc::clone(&self.bus);
            let cutoff_ms = self.cutoff_ms;
            let task_group = Arc::clone(&group);
            tokio::spawn(async move {
                Self::run_timer(system, bus, task_group, generation, cutoff_ms).await;
            });
            log::debug!(
                "[Poller] Auto poll enabled for '{id}' at {} ms",
                group.interval_ms()
            );
        } else {
            group.set_auto_poll(false);
            group.bump_generation();
            log::debug!("[Poller] Auto poll disabled for '{id}'");
        }
        Ok(())
    }

    /// Poll a group immediately
    ///
    /// Shares the overlap flag with the timer so a manual poll never runs
    /// concurrently with a tick of the same group.
    pub async fn poll_once(&self, id: &str) -> ClResult<ChangeSet> {
        let group = self.get(id)?;
        while group.poll_in_progress.swap(true, Ordering::AcqRel) {
            tokio::task::yield_now().await;
        }
        let result = Self::run_tick(&self.system, &self.bus, &group).await;
        group.poll_in_progress.store(false, Ordering::Release);
        result
    }

    /// Group ids, sorted for stable output
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.groups.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of one group
    pub fn group_info(&self, id: &str) -> ClResult<GroupInfo> {
        Ok(self.get(id)?.info(self.cutoff_ms))
    }

    /// Destroy every group
    pub fn close(&self) {
        let ids = self.list();
        for id in ids {
            self.destroy(&id);
        }
    }

    /// One batched read and diff pass
    async fn run_tick(
        system: &Arc<dyn ControlSystem>,
        bus: &EventBus,
        group: &GroupState,
    ) -> ClResult<ChangeSet> {
        let names = group.controls();
        let timestamp = time::monotonic_ns();
        let timestamp_ms = time::wall_ms();

        let mut set = ChangeSet {
            group_id: group.id.clone(),
            changes: Vec::new(),
            timestamp,
            timestamp_ms,
        };
        if names.is_empty() {
            return Ok(set);
        }

        let readings = system.get_controls(&names).await?;

        for (name, reading) in names.iter().zip(readings.iter()) {
            if group.observe(name, &reading.value, &reading.string) {
                set.changes.push(ControlChange {
                    name: name.clone(),
                    value: reading.value.clone(),
                    string: reading.string.clone(),
                });
            }
        }

        // The group may have been destroyed while the read was in flight
        if !set.is_empty() && group.is_alive() {
            bus.publish(&BridgeEvent::ChangeGroupChanges(set.clone()));
        }
        Ok(set)
    }

    /// Timer loop for one group; exits when the generation moves on
    async fn run_timer(
        system: Arc<dyn ControlSystem>,
        bus: Arc<EventBus>,
        group: Arc<GroupState>,
        generation: u64,
        cutoff_ms: u64,
    ) {
        loop {
            if !group.is_alive() || !group.auto_poll() || group.generation() != generation {
                break;
            }

            let interval = Duration::from_millis(group.interval_ms());
            let mode = GroupMode::for_interval(group.interval_ms(), cutoff_ms);
            let started = Instant::now();

            if !group.poll_in_progress.swap(true, Ordering::AcqRel) {
                let result = Self::run_tick(&system, &bus, &group).await;
                group.poll_in_progress.store(false, Ordering::Release);
                if let Err(e) = result {
                    log::warn!("[Poller] Tick failed for '{}': {e}", group.id);
                }
            }
            // A set flag means another tick or a manual poll is mid-read;
            // this tick is dropped rather than queued

            if group.generation() != generation {
                break;
            }

            let delay = match mode {
                GroupMode::HighFrequency => std::cmp::max(
                    interval.saturating_sub(started.elapsed()),
                    Duration::from_millis(1),
                ),
                GroupMode::Normal => interval,
            };
            tokio::time::sleep(delay).await;
        }
        log::debug!("[Poller] Timer for '{}' stopped", group.id);
    }
}
