//! Event ring buffer with a fused timestamp index
//!
//! Fixed-capacity FIFO of change events. The timestamp index lives inside
//! the ring and is updated in the same call that overwrites a slot, so an
//! overwritten slot's old timestamp can never linger and surface in a range
//! query. Keeping the two structures as one type is what makes the
//! guarantee structural instead of procedural.

use std::collections::BTreeMap;

use cl_core::ChangeEvent;

/// Fixed-capacity ring of change events
pub struct RingBuffer {
    capacity: usize,
    slots: Vec<Option<ChangeEvent>>,
    /// Next write position; when full this is also the oldest slot
    head: usize,
    len: usize,
    /// timestamp -> slots holding an event with that timestamp, in arrival
    /// order (one tick can stamp several events identically)
    index: BTreeMap<u64, Vec<usize>>,
    est_bytes: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: vec![None; capacity],
            head: 0,
            len: 0,
            index: BTreeMap::new(),
            est_bytes: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Estimated bytes held
    pub fn est_bytes(&self) -> usize {
        self.est_bytes
    }

    /// Oldest slot position
    fn tail(&self) -> usize {
        (self.head + self.capacity - self.len) % self.capacity
    }

    fn remove_index_entry(&mut self, timestamp: u64, slot: usize) {
        if let Some(slots) = self.index.get_mut(&timestamp) {
            slots.retain(|&s| s != slot);
            if slots.is_empty() {
                self.index.remove(&timestamp);
            }
        }
    }

    /// Drop the event in `slot`, keeping index and byte count consistent
    fn evict_slot(&mut self, slot: usize) -> Option<ChangeEvent> {
        let event = self.slots[slot].take()?;
        self.remove_index_entry(event.timestamp, slot);
        self.est_bytes = self.est_bytes.saturating_sub(event.estimated_bytes());
        Some(event)
    }

    /// Append an event; overwrites the oldest when full
    pub fn add(&mut self, event: ChangeEvent) {
        if self.len == self.capacity {
            // The slot being reclaimed must leave the index before its new
            // timestamp goes in
            self.evict_slot(self.head);
            self.len -= 1;
        }

        let slot = self.head;
        self.est_bytes += event.estimated_bytes();
        self.index.entry(event.timestamp).or_default().push(slot);
        self.slots[slot] = Some(event);
        self.head = (self.head + 1) % self.capacity;
        self.len += 1;
    }

    /// Events with `from <= timestamp <= to`, in timestamp order
    pub fn query_time_range(&self, from: u64, to: u64) -> Vec<ChangeEvent> {
        if from > to {
            return Vec::new();
        }
        self.index
            .range(from..=to)
            .flat_map(|(_, slots)| slots.iter())
            .filter_map(|&slot| self.slots[slot].clone())
            .collect()
    }

    /// Drop the `k` oldest events; returns how many were actually dropped
    pub fn force_evict(&mut self, k: usize) -> usize {
        let count = k.min(self.len);
        for _ in 0..count {
            let tail = self.tail();
            self.evict_slot(tail);
            self.len -= 1;
        }
        count
    }

    /// Drop events older than `age_ms` relative to `now_ms`
    ///
    /// Walks from the oldest end and stops at the first survivor; within a
    /// group wall timestamps are non-decreasing, so nothing newer can be
    /// expired once one event is fresh enough.
    pub fn evict_older_than(&mut self, age_ms: u64, now_ms: u64) -> usize {
        let mut evicted = 0;
        while self.len > 0 {
            let tail = self.tail();
            let expired = match &self.slots[tail] {
                Some(event) => now_ms.saturating_sub(event.timestamp_ms) > age_ms,
                None => false,
            };
            if !expired {
                break;
            }
            self.evict_slot(tail);
            self.len -= 1;
            evicted += 1;
        }
        evicted
    }

    /// Timestamp of the oldest held event
    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.index.keys().next().copied()
    }

    /// Timestamp of the newest held event
    pub fn newest_timestamp(&self) -> Option<u64> {
        self.index.keys().next_back().copied()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.index.clear();
        self.head = 0;
        self.len = 0;
        self.est_bytes = 0;
    }

    /// Every held event in arrival order (oldest first)
    pub fn snapshot(&self) -> Vec<ChangeEvent> {
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.len {
            let slot = (self.tail() + i) % self.capacity;
            if let Some(event) = &self.slots[slot] {
                out.push(event.clone());
            }
        }
        out
    }

    /// Test hook: every index entry must point at a slot holding an event
    /// with exactly that timestamp
    #[cfg(test)]
    pub fn index_is_consistent(&self) -> bool {
        let indexed: usize = self.index.values().map(|v| v.len()).sum();
        if indexed != self.len {
            return false;
        }
        self.index.iter().all(|(&t, slots)| {
            slots
                .iter()
                .all(|&s| matches!(&self.slots[s], Some(e) if e.timestamp == t))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cl_core::ControlValue;

    fn event(timestamp: u64) -> ChangeEvent {
        ChangeEvent {
            group_id: "g".into(),
            control_name: "A.x".into(),
            value: ControlValue::Number(timestamp as f64),
            string: timestamp.to_string(),
            previous_value: None,
            previous_string: None,
            delta: None,
            timestamp,
            timestamp_ms: timestamp / 1_000_000,
            sequence_number: timestamp,
        }
    }

    fn timestamps(events: &[ChangeEvent]) -> Vec<u64> {
        events.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn test_size_tracks_adds_up_to_capacity() {
        let mut ring = RingBuffer::new(3);
        for (k, t) in [100u64, 200, 300, 400, 500].iter().enumerate() {
            ring.add(event(*t));
            assert_eq!(ring.len(), (k + 1).min(3));
        }
        // Only the last 3 remain, in timestamp order
        assert_eq!(timestamps(&ring.query_time_range(0, u64::MAX)), vec![300, 400, 500]);
        assert!(ring.index_is_consistent());
    }

    #[test]
    fn test_stale_index_regression() {
        // Capacity 3; overwrites must scrub the displaced timestamps
        let mut ring = RingBuffer::new(3);
        for t in [1000u64, 2000, 3000] {
            ring.add(event(t));
        }
        ring.add(event(4000)); // displaces 1000
        ring.add(event(500)); // displaces 2000

        assert!(ring.query_time_range(2000, 2000).is_empty());
        assert_eq!(timestamps(&ring.query_time_range(0, 1000)), vec![500]);
        assert_eq!(timestamps(&ring.query_time_range(3500, 4500)), vec![4000]);
        assert!(ring.index_is_consistent());
    }

    #[test]
    fn test_capacity_one() {
        let mut ring = RingBuffer::new(1);
        ring.add(event(10));
        ring.add(event(20));
        assert_eq!(ring.len(), 1);
        assert_eq!(timestamps(&ring.query_time_range(0, u64::MAX)), vec![20]);
        assert!(ring.query_time_range(10, 10).is_empty());
        assert!(ring.index_is_consistent());
    }

    #[test]
    fn test_duplicate_timestamps_preserve_arrival_order() {
        let mut ring = RingBuffer::new(4);
        let mut a = event(100);
        a.control_name = "A.first".into();
        let mut b = event(100);
        b.control_name = "A.second".into();
        ring.add(a);
        ring.add(b);

        let hits = ring.query_time_range(100, 100);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].control_name, "A.first");
        assert_eq!(hits[1].control_name, "A.second");
    }

    #[test]
    fn test_force_evict_oldest() {
        let mut ring = RingBuffer::new(5);
        for t in [10u64, 20, 30, 40] {
            ring.add(event(t));
        }
        assert_eq!(ring.force_evict(2), 2);
        assert_eq!(timestamps(&ring.query_time_range(0, u64::MAX)), vec![30, 40]);
        // Asking for more than held drops what is there
        assert_eq!(ring.force_evict(10), 2);
        assert!(ring.is_empty());
        assert!(ring.index_is_consistent());
    }

    #[test]
    fn test_evict_older_than() {
        let mut ring = RingBuffer::new(8);
        for ms in [1_000u64, 2_000, 3_000, 9_000] {
            let mut e = event(ms * 1_000_000);
            e.timestamp_ms = ms;
            ring.add(e);
        }
        // At now=10s with max age 5s, everything at or before 5s goes
        let evicted = ring.evict_older_than(5_000, 10_000);
        assert_eq!(evicted, 3);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.newest_timestamp(), Some(9_000 * 1_000_000));
    }

    #[test]
    fn test_byte_accounting() {
        let mut ring = RingBuffer::new(2);
        assert_eq!(ring.est_bytes(), 0);
        ring.add(event(1));
        let one = ring.est_bytes();
        assert!(one >= 200);
        ring.add(event(2));
        assert_eq!(ring.est_bytes(), one * 2);
        // Overwrite keeps the total flat
        ring.add(event(3));
        assert_eq!(ring.est_bytes(), one * 2);
        ring.clear();
        assert_eq!(ring.est_bytes(), 0);
    }

    #[test]
    fn test_snapshot_arrival_order_after_wrap() {
        let mut ring = RingBuffer::new(3);
        for t in [1u64, 2, 3, 4, 5] {
            ring.add(event(t));
        }
        assert_eq!(timestamps(&ring.snapshot()), vec![3, 4, 5]);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let mut ring = RingBuffer::new(3);
        ring.add(event(100));
        assert!(ring.query_time_range(200, 100).is_empty());
    }
}
