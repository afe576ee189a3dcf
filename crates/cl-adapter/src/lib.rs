//! # cl-adapter - CoreLink Control Adapter
//!
//! The stateful facade between the typed `ControlSystem` interface and the
//! engine SDK:
//! - Lazy control index with atomic rebuilds and invalidation
//! - Value validation and coercion on writes
//! - Retry with exponential backoff on transient failures
//! - Disconnect-tolerant status reporting
//! - Reconnect coordination with long-downtime cache invalidation

pub mod adapter;
pub mod index;
pub mod reconnect;
pub mod retry;
pub mod validate;

// Re-exports
pub use adapter::ControlAdapter;
pub use index::{ControlHandle, ControlIndex, NameResolution};
pub use reconnect::{CacheReset, ReconnectCoordinator};
pub use retry::RetryPolicy;
pub use validate::coerce_value;
