//! # cl-engine - CoreLink Engine SDK Boundary
//!
//! Everything that touches the engine's control socket:
//! - Exact wire command names and JSON-RPC framing
//! - The `EngineSdk` trait the rest of the bridge consumes
//! - `WsEngine`: WebSocket transport with heartbeat and auto-reconnect
//! - `SimEngine`: in-memory core for tests and demos

pub mod protocol;
pub mod sdk;
pub mod sim;
pub mod ws;

// Re-exports
pub use protocol::{
    Method, RpcError, RpcRequest, RpcResponse, WireComponent, WireComponentControls, WireControl,
    WireProperty, WireSetItem, WireSetResult,
};
pub use sdk::{ConnectionState, EngineError, EngineResult, EngineSdk, SdkEvent};
pub use sim::SimEngine;
pub use ws::WsEngine;
