//! Error taxonomy for the CoreLink bridge

use thiserror::Error;

/// Bridge-wide error type
///
/// The variants map to handling policies: `Transient` is the only kind the
/// retry layer will re-attempt; `NotConnected` is refused immediately without
/// retry; the cache kinds (`StorageFull`, `OutOfMemory`, `Corruption`) drive
/// the cache manager's recovery actions.
#[derive(Error, Debug)]
pub enum ClError {
    #[error("Not connected to the engine")]
    NotConnected,

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Corrupted group buffer: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type ClResult<T> = Result<T, ClError>;

/// Network error codes treated as transient
const TRANSIENT_CODES: [&str; 5] = [
    "ETIMEDOUT",
    "ECONNRESET",
    "ECONNREFUSED",
    "ENOTFOUND",
    "EHOSTUNREACH",
];

/// Message fragments treated as transient
const TRANSIENT_FRAGMENTS: [&str; 4] = ["timeout", "network", "connection", "temporarily unavailable"];

impl ClError {
    /// Whether the retry policy may re-attempt the failed operation
    pub fn is_transient(&self) -> bool {
        match self {
            ClError::Transient(_) => true,
            ClError::Io(e) => message_is_transient(&e.to_string()),
            _ => false,
        }
    }

    /// Classify an error message the way the retry policy does
    pub fn message_is_transient(message: &str) -> bool {
        message_is_transient(message)
    }
}

fn message_is_transient(message: &str) -> bool {
    if TRANSIENT_CODES.iter().any(|code| message.contains(code)) {
        return true;
    }
    let lower = message.to_lowercase();
    TRANSIENT_FRAGMENTS.iter().any(|frag| lower.contains(frag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClError::Transient("socket hang up".into()).is_transient());
        assert!(ClError::message_is_transient("ETIMEDOUT while reading"));
        assert!(ClError::message_is_transient("Connection reset by peer"));
        assert!(ClError::message_is_transient("service temporarily unavailable"));
        assert!(!ClError::message_is_transient("Component not found: FakeComp"));
    }

    #[test]
    fn test_non_transient_kinds() {
        assert!(!ClError::NotConnected.is_transient());
        assert!(!ClError::InvalidArgument("bad".into()).is_transient());
        assert!(!ClError::NotFound("X".into()).is_transient());
        assert!(!ClError::AlreadyExists("g".into()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let e = ClError::NotFound("Component not found: FakeComp".into());
        assert_eq!(e.to_string(), "Not found: Component not found: FakeComp");
        assert_eq!(
            ClError::NotConnected.to_string(),
            "Not connected to the engine"
        );
    }
}
