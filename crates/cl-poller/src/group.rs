//! Change group state
//!
//! A group is a named, mutable subscription set. The poller keeps the
//! controls as names and resolves them through the adapter on every tick, so
//! no handle pointer can go stale inside a group.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cl_core::ControlValue;

/// Timer mode, derived from the interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMode {
    /// Self-scheduling tick, used below the cutoff
    HighFrequency,
    /// Interval ticker
    Normal,
}

impl GroupMode {
    pub fn for_interval(interval_ms: u64, cutoff_ms: u64) -> GroupMode {
        if interval_ms < cutoff_ms {
            GroupMode::HighFrequency
        } else {
            GroupMode::Normal
        }
    }
}

/// Last observed value of one control
#[derive(Debug, Clone, PartialEq)]
pub struct LastValue {
    pub value: ControlValue,
    pub string: String,
}

/// Snapshot of a group for listings and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub controls: Vec<String>,
    pub interval_ms: u64,
    pub mode: GroupMode,
    pub auto_poll: bool,
}

/// Shared state of one change group
pub struct GroupState {
    pub id: String,
    /// Subscribed control names in insertion order, no duplicates
    controls: Mutex<Vec<String>>,
    /// Last observed value per control
    last_seen: Mutex<HashMap<String, LastValue>>,
    interval_ms: AtomicU64,
    auto_poll: AtomicBool,
    /// Guards against overlapping ticks
    pub poll_in_progress: AtomicBool,
    /// Cleared by destroy; an in-flight tick checks it before emitting
    alive: AtomicBool,
    /// Bumped whenever the timer must be replaced or torn down
    timer_generation: AtomicU64,
}

impl GroupState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            controls: Mutex::new(Vec::new()),
            last_seen: Mutex::new(HashMap::new()),
            interval_ms: AtomicU64::new(1_000),
            auto_poll: AtomicBool::new(false),
            poll_in_progress: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            timer_generation: AtomicU64::new(0),
        }
    }

    /// Add names, skipping duplicates and blanks; returns how many landed
    pub fn add_controls(&self, names: &[String]) -> usize {
        let mut controls = self.controls.lock();
        let mut added = 0;
        for raw in names {
            let name = raw.trim();
            if name.is_empty() {
                continue;
            }
            if !controls.iter().any(|c| c == name) {
                controls.push(name.to_string());
                added += 1;
            }
        }
        added
    }

    /// Remove names; returns how many were present
    pub fn remove_controls(&self, names: &[String]) -> usize {
        let mut controls = self.controls.lock();
        let mut last_seen = self.last_seen.lock();
        let before = controls.len();
        controls.retain(|c| !names.iter().any(|n| n.trim() == c));
        let removed = before - controls.len();
        for name in names {
            last_seen.remove(name.trim());
        }
        removed
    }

    /// Drop every subscription and observation
    pub fn clear(&self) {
        self.controls.lock().clear();
        self.last_seen.lock().clear();
    }

    /// Snapshot of the subscription list
    pub fn controls(&self) -> Vec<String> {
        self.controls.lock().clone()
    }

    pub fn control_count(&self) -> usize {
        self.controls.lock().len()
    }

    /// Diff one reading against the last observation and record it
    ///
    /// Returns `true` when the value differs (or is seen for the first time).
    pub fn observe(&self, name: &str, value: &ControlValue, string: &str) -> bool {
        let mut last_seen = self.last_seen.lock();
        let changed = match last_seen.get(name) {
            Some(last) => last.value != *value,
            None => true,
        };
        if changed {
            last_seen.insert(
                name.to_string(),
                LastValue {
                    value: value.clone(),
                    string: string.to_string(),
                },
            );
        }
        changed
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn set_interval_ms(&self, interval_ms: u64) {
        self.interval_ms.store(interval_ms.max(1), Ordering::Relaxed);
    }

    pub fn auto_poll(&self) -> bool {
        self.auto_poll.load(Ordering::Relaxed)
    }

    pub fn set_auto_poll(&self, enabled: bool) {
        self.auto_poll.store(enabled, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark destroyed; the flag is checked before every emission
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
        self.auto_poll.store(false, Ordering::Relaxed);
        self.bump_generation();
        self.last_seen.lock().clear();
    }

    /// Invalidate any running timer task
    pub fn bump_generation(&self) -> u64 {
        self.timer_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.timer_generation.load(Ordering::Acquire)
    }

    pub fn info(&self, cutoff_ms: u64) -> GroupInfo {
        let interval_ms = self.interval_ms();
        GroupInfo {
            id: self.id.clone(),
            controls: self.controls(),
            interval_ms,
            mode: GroupMode::for_interval(interval_ms, cutoff_ms),
            auto_poll: self.auto_poll(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_derivation() {
        assert_eq!(GroupMode::for_interval(30, 100), GroupMode::HighFrequency);
        assert_eq!(GroupMode::for_interval(99, 100), GroupMode::HighFrequency);
        assert_eq!(GroupMode::for_interval(100, 100), GroupMode::Normal);
        assert_eq!(GroupMode::for_interval(1_000, 100), GroupMode::Normal);
    }

    #[test]
    fn test_add_controls_dedupes_and_trims() {
        let group = GroupState::new("g");
        let added = group.add_controls(&[
            "Main.gain".to_string(),
            " Main.gain ".to_string(),
            "Main.mute".to_string(),
            "".to_string(),
        ]);
        assert_eq!(added, 2);
        assert_eq!(group.controls(), vec!["Main.gain", "Main.mute"]);
    }

    #[test]
    fn test_remove_controls() {
        let group = GroupState::new("g");
        group.add_controls(&["A.x".to_string(), "A.y".to_string()]);
        let removed = group.remove_controls(&["A.x".to_string(), "A.z".to_string()]);
        assert_eq!(removed, 1);
        assert_eq!(group.controls(), vec!["A.y"]);
    }

    #[test]
    fn test_observe_first_sight_and_change() {
        let group = GroupState::new("g");
        let v1 = ControlValue::Number(-40.0);
        // First observation counts as a change
        assert!(group.observe("A.x", &v1, "-40"));
        // Same value again does not
        assert!(!group.observe("A.x", &v1, "-40"));
        // A different value does
        assert!(group.observe("A.x", &ControlValue::Number(-10.0), "-10"));
    }

    #[test]
    fn test_string_comparison_is_bytewise() {
        let group = GroupState::new("g");
        assert!(group.observe("A.s", &ControlValue::Text("On".into()), "On"));
        assert!(group.observe("A.s", &ControlValue::Text("on".into()), "on"));
    }

    #[test]
    fn test_kill_clears_state() {
        let group = GroupState::new("g");
        group.set_auto_poll(true);
        group.observe("A.x", &ControlValue::Number(1.0), "1");
        group.kill();
        assert!(!group.is_alive());
        assert!(!group.auto_poll());
    }

    #[test]
    fn test_interval_floor() {
        let group = GroupState::new("g");
        group.set_interval_ms(0);
        assert_eq!(group.interval_ms(), 1);
    }
}
