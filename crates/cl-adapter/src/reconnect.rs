//! Reconnect coordinator
//!
//! Watches the SDK's connection events. Short drops only get logged; a
//! reconnect after long downtime invalidates every registered cache so no
//! stale handle or event survives a topology change.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cl_engine::SdkEvent;

use crate::adapter::ControlAdapter;

/// Anything holding state that goes stale across long downtime
pub trait CacheReset: Send + Sync {
    fn clear_all_caches(&self);
}

impl CacheReset for ControlAdapter {
    fn clear_all_caches(&self) {
        ControlAdapter::clear_all_caches(self);
    }
}

/// Coordinator task handle
pub struct ReconnectCoordinator {
    handle: JoinHandle<()>,
    invalidations: Arc<AtomicU64>,
}

impl ReconnectCoordinator {
    /// Spawn the coordinator over an SDK event stream
    pub fn spawn(
        mut events: broadcast::Receiver<SdkEvent>,
        targets: Vec<Arc<dyn CacheReset>>,
    ) -> Self {
        let invalidations = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&invalidations);

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SdkEvent::Connected {
                        requires_cache_invalidation,
                        downtime_ms,
                    }) => {
                        if requires_cache_invalidation {
                            log::warn!(
                                "[Reconnect] Long downtime ({downtime_ms} ms), invalidating caches"
                            );
                            for target in &targets {
                                target.clear_all_caches();
                            }
                            counter.fetch_add(1, Ordering::Relaxed);
                        } else {
                            log::info!("[Reconnect] Connected after {downtime_ms} ms");
                        }
                    }
                    Ok(SdkEvent::Disconnected { reason }) => {
                        log::warn!("[Reconnect] Engine disconnected: {reason}");
                    }
                    Ok(SdkEvent::Reconnecting { attempt }) => {
                        log::info!("[Reconnect] Reconnect attempt {attempt}");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[Reconnect] Missed {skipped} connection events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            handle,
            invalidations,
        }
    }

    /// Long-downtime invalidations performed so far
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Stop watching connection events
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for ReconnectCoordinator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
