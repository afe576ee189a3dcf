//! # cl-bridge - CoreLink Tool Surface
//!
//! The client-facing layer of the bridge:
//! - Tool handlers returning the canonical JSON envelope
//! - The `Bridge` composition root wiring adapter, poller, cache and
//!   reconnect coordination together

pub mod bridge;
pub mod tools;

// Re-exports
pub use bridge::Bridge;
pub use tools::{ToolResult, ToolSurface};
