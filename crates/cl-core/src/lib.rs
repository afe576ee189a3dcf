//! # cl-core - CoreLink Shared Types
//!
//! Foundation crate for the CoreLink control bridge:
//! - Tagged scalar control values with display strings
//! - Change events and per-tick change sets
//! - The `ControlSystem` interface implemented by the adapter
//! - Error taxonomy shared across the bridge
//! - Configuration with file loading and env override
//! - Bounded publish/subscribe event bus

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod system;
pub mod time;
pub mod value;

// Re-exports
pub use bus::{BridgeEvent, EventBus, PressureLevel, Subscription};
pub use config::{
    AdapterConfig, BridgeConfig, CacheConfig, EngineConfig, PollerConfig, QueryCacheConfig,
    ValidationConfig,
};
pub use error::{ClError, ClResult};
pub use event::{ChangeEvent, ChangeSet, ControlChange, GroupPriority};
pub use system::{
    ComponentControls, ComponentInfo, ControlInfo, ControlReading, ControlSystem, ControlWrite,
    EngineStatus, PropertyInfo, StatusCode, WriteResult,
};
pub use value::{ControlMeta, ControlType, ControlValue};
