//! Bridge event bus
//!
//! Explicit publish/subscribe between the poller, the cache manager, and
//! observers. Every subscriber gets its own bounded queue: publishers never
//! block, and when a queue overflows the oldest queued event is dropped (the
//! newest always lands) while a per-subscriber counter records the loss.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event::ChangeSet;

/// Default per-subscriber queue capacity
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Memory pressure severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    /// Usage at or above 80% of the budget
    High,
    /// Usage at or above 90% of the budget
    Critical,
}

/// Observable side effects of the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A poll tick produced changed controls
    ChangeGroupChanges(ChangeSet),
    /// Memory usage crossed a pressure threshold
    MemoryPressure {
        level: PressureLevel,
        percentage: f64,
        total_usage: usize,
    },
    /// Eviction brought usage back under the high watermark
    MemoryPressureResolved { freed: usize, current_usage: usize },
    /// Age cleanup evicted expired events
    Cleanup { total_evicted: usize },
    /// Out-of-memory recovery dropped roughly half of all events
    EmergencyEviction {
        total_evicted: usize,
        timestamp_ms: u64,
    },
    /// An error passed through the central handler
    Error {
        message: String,
        context: String,
        group_id: Option<String>,
        timestamp_ms: u64,
    },
}

impl BridgeEvent {
    /// External event name
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::ChangeGroupChanges(_) => "changeGroup:changes",
            BridgeEvent::MemoryPressure { .. } => "memoryPressure",
            BridgeEvent::MemoryPressureResolved { .. } => "memoryPressureResolved",
            BridgeEvent::Cleanup { .. } => "cleanup",
            BridgeEvent::EmergencyEviction { .. } => "emergencyEviction",
            BridgeEvent::Error { .. } => "error",
        }
    }
}

struct SubscriberSlot {
    id: u64,
    tx: Sender<BridgeEvent>,
    /// Drain handle onto the same queue, used to discard the oldest event
    /// when the queue is full
    drain: Receiver<BridgeEvent>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

/// A subscriber's end of the bus
pub struct Subscription {
    id: u64,
    receiver: Receiver<BridgeEvent>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl Subscription {
    /// Subscriber id, useful in logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<BridgeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Blocking receive with a deadline
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BridgeEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Drain everything currently queued
    pub fn drain(&self) -> Vec<BridgeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            out.push(event);
        }
        out
    }

    /// Events lost to queue overflow
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// Publish/subscribe hub
pub struct EventBus {
    subscribers: Mutex<Vec<SubscriberSlot>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe with the default queue capacity
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Subscribe with an explicit queue capacity
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        let (tx, rx) = bounded(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicBool::new(false));

        self.subscribers.lock().push(SubscriberSlot {
            id,
            tx,
            drain: rx.clone(),
            dropped: Arc::clone(&dropped),
            closed: Arc::clone(&closed),
        });

        Subscription {
            id,
            receiver: rx,
            dropped,
            closed,
        }
    }

    /// Publish an event to every live subscriber without blocking
    pub fn publish(&self, event: &BridgeEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|slot| !slot.closed.load(Ordering::Relaxed));

        for slot in subscribers.iter() {
            loop {
                match slot.tx.try_send(event.clone()) {
                    Ok(()) => break,
                    Err(TrySendError::Full(_)) => {
                        // Make room by discarding the oldest queued event
                        if slot.drain.try_recv().is_ok() {
                            slot.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
        }
    }

    /// Live subscriber count
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|slot| !slot.closed.load(Ordering::Relaxed));
        subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleanup_event(n: usize) -> BridgeEvent {
        BridgeEvent::Cleanup { total_evicted: n }
    }

    #[test]
    fn test_publish_subscribe() {
        let bus = EventBus::new();
        let sub = bus.subscribe();

        bus.publish(&cleanup_event(3));
        match sub.try_recv() {
            Some(BridgeEvent::Cleanup { total_evicted }) => assert_eq!(total_evicted, 3),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_overflow_drops_oldest_never_newest() {
        let bus = EventBus::new();
        let sub = bus.subscribe_with_capacity(2);

        bus.publish(&cleanup_event(1));
        bus.publish(&cleanup_event(2));
        bus.publish(&cleanup_event(3));

        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], cleanup_event(2));
        assert_eq!(drained[1], cleanup_event(3));
        assert_eq!(sub.dropped_count(), 1);
    }

    #[test]
    fn test_dropped_subscription_is_removed() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        bus.publish(&cleanup_event(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_independent_subscriber_queues() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(&cleanup_event(7));
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_some());
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(cleanup_event(0).name(), "cleanup");
        let pressure = BridgeEvent::MemoryPressure {
            level: PressureLevel::High,
            percentage: 81.0,
            total_usage: 1024,
        };
        assert_eq!(pressure.name(), "memoryPressure");
    }
}
