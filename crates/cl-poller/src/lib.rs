//! # cl-poller - CoreLink Change-Group Poller
//!
//! Named, mutable subscription sets polled at caller-chosen rates:
//! - Dual-mode timing: self-scheduling below the cutoff, interval above
//! - Overlap suppression via an atomic per-group flag
//! - One batched read per tick, diffed against the last observation
//! - Synchronous, idempotent group destruction

pub mod group;
pub mod poller;

// Re-exports
pub use group::{GroupInfo, GroupMode, GroupState, LastValue};
pub use poller::PollerEngine;
