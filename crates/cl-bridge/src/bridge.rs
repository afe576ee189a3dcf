//! Composition root
//!
//! Builds the bridge out of its parts and hands out the tool surface. There
//! is no global state anywhere: the SDK comes in from the caller, every
//! other component is constructed here and connected by explicit references.

use std::sync::Arc;

use cl_adapter::{CacheReset, ControlAdapter, ReconnectCoordinator};
use cl_cache::EventCacheManager;
use cl_core::{BridgeConfig, ClResult, EventBus};
use cl_engine::EngineSdk;
use cl_poller::PollerEngine;

use crate::tools::ToolSurface;

/// Adapter for the cache manager's reset hook
struct CacheManagerReset(Arc<EventCacheManager>);

impl CacheReset for CacheManagerReset {
    fn clear_all_caches(&self) {
        self.0.clear_all_caches();
    }
}

/// A fully wired control bridge
pub struct Bridge {
    config: Arc<BridgeConfig>,
    sdk: Arc<dyn EngineSdk>,
    adapter: Arc<ControlAdapter>,
    poller: Arc<PollerEngine>,
    cache: Arc<EventCacheManager>,
    bus: Arc<EventBus>,
    coordinator: ReconnectCoordinator,
}

impl Bridge {
    /// Wire a bridge over the given SDK
    ///
    /// Must be called from within a tokio runtime; the cache tickers and the
    /// reconnect coordinator spawn immediately.
    pub fn new(sdk: Arc<dyn EngineSdk>, config: BridgeConfig) -> Self {
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new());

        let adapter = Arc::new(ControlAdapter::new(Arc::clone(&sdk), &config));
        let poller = Arc::new(PollerEngine::new(
            Arc::clone(&adapter) as Arc<dyn cl_core::ControlSystem>,
            Arc::clone(&bus),
            config.poller.high_frequency_cutoff_ms,
        ));
        let cache = Arc::new(EventCacheManager::new(
            Arc::clone(&bus),
            config.cache.clone(),
            &config.query_cache,
        ));
        cache.start();

        let coordinator = ReconnectCoordinator::spawn(
            sdk.subscribe_events(),
            vec![
                Arc::clone(&adapter) as Arc<dyn CacheReset>,
                Arc::new(CacheManagerReset(Arc::clone(&cache))),
            ],
        );

        Self {
            config,
            sdk,
            adapter,
            poller,
            cache,
            bus,
            coordinator,
        }
    }

    /// Connect the SDK
    pub async fn connect(&self) -> ClResult<()> {
        self.sdk.connect().await.map_err(Into::into)
    }

    /// The tool surface for this bridge
    pub fn tools(&self) -> ToolSurface {
        ToolSurface::new(
            Arc::clone(&self.adapter) as Arc<dyn cl_core::ControlSystem>,
            Arc::clone(&self.poller),
            Arc::clone(&self.cache),
            Arc::clone(&self.config),
        )
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn adapter(&self) -> Arc<ControlAdapter> {
        Arc::clone(&self.adapter)
    }

    pub fn poller(&self) -> Arc<PollerEngine> {
        Arc::clone(&self.poller)
    }

    pub fn cache(&self) -> Arc<EventCacheManager> {
        Arc::clone(&self.cache)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn coordinator(&self) -> &ReconnectCoordinator {
        &self.coordinator
    }

    /// Tear the bridge down: timers first, then the cache, then the socket
    pub async fn close(&self) {
        self.poller.close();
        self.cache.close();
        self.coordinator.shutdown();
        self.sdk.disconnect().await;
        log::info!("[Bridge] Closed");
    }
}
