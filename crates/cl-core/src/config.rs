//! Bridge configuration
//!
//! All tunables in one place, loadable from `corelink.config.json` with a
//! `CORELINK_CONFIG` env override. Every section has defaults so a partial
//! (or absent) file is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClError, ClResult};

/// Engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine host name or address
    pub host: String,
    /// Engine control port
    pub port: u16,
    /// Use wss:// instead of ws://
    pub secure: bool,
    /// Connection establishment timeout
    pub connection_timeout_ms: u64,
    /// Keepalive interval while connected
    pub heartbeat_ms: u64,
    /// Delay between reconnect attempts
    pub reconnect_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 443,
            secure: true,
            connection_timeout_ms: 10_000,
            heartbeat_ms: 30_000,
            reconnect_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// WebSocket URL for the engine's control endpoint
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/qrc", scheme, self.host, self.port)
    }
}

/// Event cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ring capacity per change group
    pub max_entries: usize,
    /// Event max age; 0 disables age cleanup
    pub ttl_ms: u64,
    /// Global memory budget in MiB
    pub max_memory_mb: usize,
    /// Memory usage check interval
    pub memory_check_interval_ms: u64,
    /// Age cleanup interval
    pub cleanup_interval_ms: u64,
    /// Downtime beyond which caches are invalidated on reconnect
    pub long_downtime_threshold_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl_ms: 1_800_000,
            max_memory_mb: 500,
            memory_check_interval_ms: 1_000,
            cleanup_interval_ms: 1_000,
            long_downtime_threshold_ms: 30_000,
        }
    }
}

impl CacheConfig {
    /// Budget in bytes
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb * 1024 * 1024
    }
}

/// Poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Intervals below this run in high-frequency mode
    pub high_frequency_cutoff_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            high_frequency_cutoff_ms: 100,
        }
    }
}

/// Adapter retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Retry attempts after the first failure
    pub max_retries: u32,
    /// Base retry delay
    pub retry_delay_ms: u64,
    /// Backoff multiplier per attempt
    pub retry_backoff: f64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_backoff: 2.0,
        }
    }
}

/// Write validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Default max length for string controls without metadata
    pub string_max_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            string_max_length: 255,
        }
    }
}

/// Query result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Max cached query results
    pub capacity: usize,
    /// Result freshness window
    pub ttl_ms: u64,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl_ms: 5_000,
        }
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub poller: PollerConfig,
    pub adapter: AdapterConfig,
    pub validation: ValidationConfig,
    pub query_cache: QueryCacheConfig,
}

impl BridgeConfig {
    /// Load configuration from the conventional locations
    ///
    /// Tries `CORELINK_CONFIG`, then `corelink.config.json` in the working
    /// directory. Falls back to defaults when no file exists.
    pub fn load() -> ClResult<Self> {
        if let Ok(p) = std::env::var("CORELINK_CONFIG") {
            return Self::load_from_path(Path::new(&p));
        }

        let local = PathBuf::from("corelink.config.json");
        if local.exists() {
            return Self::load_from_path(&local);
        }

        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from_path(path: &Path) -> ClResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ClError::InvalidArgument(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: BridgeConfig = serde_json::from_str(&raw).map_err(|e| {
            ClError::InvalidArgument(format!("Invalid config {}: {e}", path.display()))
        })?;
        Ok(config)
    }
}
