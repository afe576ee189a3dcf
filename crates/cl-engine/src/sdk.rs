//! Engine SDK interface
//!
//! The bridge consumes the engine through this trait; the concrete transport
//! ([`crate::WsEngine`]) and the simulated core ([`crate::SimEngine`]) both
//! implement it. Connection lifecycle is observable through a broadcast
//! stream of [`SdkEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use cl_core::ClError;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never connected yet
    Initializing,
    /// Connection in progress
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection lost
    Disconnected,
    /// Connection lost, retry loop active
    Reconnecting,
}

/// Connection lifecycle events emitted by an SDK implementation
#[derive(Debug, Clone, PartialEq)]
pub enum SdkEvent {
    /// A connection was (re-)established
    Connected {
        /// Downtime exceeded the long-downtime threshold; consumers must
        /// invalidate name indexes and caches
        requires_cache_invalidation: bool,
        /// How long the engine was unreachable, 0 on first connect
        downtime_ms: u64,
    },
    /// The connection dropped
    Disconnected { reason: String },
    /// A reconnect attempt is starting
    Reconnecting { attempt: u32 },
}

/// SDK-level errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Not connected")]
    NotConnected,

    #[error("Command timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Engine error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to send command")]
    SendFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for ClError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotConnected => ClError::NotConnected,
            EngineError::Timeout => ClError::Transient("Command timeout".to_string()),
            EngineError::SendFailed => ClError::Transient("Failed to send command".to_string()),
            EngineError::ConnectionFailed(m) => ClError::Transient(format!("Connection failed: {m}")),
            EngineError::Rpc { code, message } => {
                let lower = message.to_lowercase();
                if lower.contains("not found") || lower.contains("unknown component") {
                    ClError::NotFound(message)
                } else if ClError::message_is_transient(&message) {
                    ClError::Transient(message)
                } else {
                    ClError::Internal(format!("Engine error {code}: {message}"))
                }
            }
            EngineError::Protocol(m) => ClError::Internal(format!("Protocol error: {m}")),
            EngineError::Io(e) => ClError::Io(e),
        }
    }
}

/// Interface to the engine's control socket
#[async_trait]
pub trait EngineSdk: Send + Sync {
    /// Establish the connection; idempotent when already connected
    async fn connect(&self) -> EngineResult<()>;

    /// Tear the connection down and stop reconnecting
    async fn disconnect(&self);

    /// Whether the socket is currently usable
    fn is_connected(&self) -> bool;

    /// Current lifecycle state
    fn state(&self) -> ConnectionState;

    /// Issue one command and await its response
    async fn send_command(&self, method: &str, params: Option<Value>) -> EngineResult<Value>;

    /// Subscribe to connection lifecycle events
    fn subscribe_events(&self) -> broadcast::Receiver<SdkEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_kinds() {
        assert!(matches!(
            ClError::from(EngineError::NotConnected),
            ClError::NotConnected
        ));
        assert!(ClError::from(EngineError::Timeout).is_transient());
        assert!(ClError::from(EngineError::ConnectionFailed("ECONNRESET".into())).is_transient());

        let not_found = ClError::from(EngineError::Rpc {
            code: 8,
            message: "Component not found: FakeComp".into(),
        });
        assert!(matches!(not_found, ClError::NotFound(_)));

        let internal = ClError::from(EngineError::Rpc {
            code: -32600,
            message: "Invalid request".into(),
        });
        assert!(matches!(internal, ClError::Internal(_)));
    }

    #[test]
    fn test_states_distinct() {
        assert_ne!(ConnectionState::Initializing, ConnectionState::Connected);
        assert_ne!(ConnectionState::Disconnected, ConnectionState::Reconnecting);
    }
}
