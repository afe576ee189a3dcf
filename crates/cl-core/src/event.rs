//! Change events and change sets
//!
//! The poller emits one `ChangeSet` per tick with the controls whose values
//! differ from the last observation. The cache manager enriches those into
//! `ChangeEvent` records with previous values, deltas, and sequence numbers.

use serde::{Deserialize, Serialize};

use crate::value::ControlValue;

/// Eviction priority of a change group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPriority {
    /// Evicted first under memory pressure
    Low,
    Normal,
    /// Evicted only when nothing else is left to free
    High,
}

impl Default for GroupPriority {
    fn default() -> Self {
        GroupPriority::Normal
    }
}

/// One changed control within a poll tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlChange {
    /// Full `"Component.Control"` name
    pub name: String,
    /// Observed value
    pub value: ControlValue,
    /// Display form of the value
    pub string: String,
}

impl ControlChange {
    pub fn new(name: impl Into<String>, value: ControlValue) -> Self {
        let string = value.display_string();
        Self {
            name: name.into(),
            value,
            string,
        }
    }
}

/// Envelope emitted by the poller for one tick of one group
///
/// All changes in a set share the tick's timestamp; their order matches the
/// order of the controls within the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Group that produced the changes
    pub group_id: String,
    /// Changed controls, in group order
    pub changes: Vec<ControlChange>,
    /// Monotonic timestamp in nanoseconds
    pub timestamp: u64,
    /// Wall-clock milliseconds for display
    pub timestamp_ms: u64,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Immutable change record stored in the event cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Group that produced the event
    pub group_id: String,
    /// Full `"Component.Control"` name
    pub control_name: String,
    /// Value at observation time
    pub value: ControlValue,
    /// Display form of the value
    pub string: String,
    /// Value at the previous observation, absent on first sight
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<ControlValue>,
    /// Display form of the previous value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_string: Option<String>,
    /// Numeric difference, present only when both values are numbers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Monotonic timestamp in nanoseconds
    pub timestamp: u64,
    /// Wall-clock milliseconds for display
    pub timestamp_ms: u64,
    /// Monotonic per-manager sequence number
    pub sequence_number: u64,
}

impl ChangeEvent {
    /// Estimated retained size in bytes, used for the memory budget
    ///
    /// Floor of 200 bytes plus a 20% overhead factor; an approximation of
    /// retained size, not a measurement.
    pub fn estimated_bytes(&self) -> usize {
        let payload = self.control_name.len()
            + self.string.len()
            + self.previous_string.as_ref().map_or(0, |s| s.len())
            + self.group_id.len()
            + 96;
        (payload.max(200) as f64 * 1.2) as usize
    }
}
