//! Cache statistics and health reporting

use serde::{Deserialize, Serialize};

use cl_core::GroupPriority;

use crate::query_cache::QueryCacheStats;

/// Memory accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_bytes: usize,
    pub limit_bytes: usize,
    pub usage_percent: f64,
}

/// Per-group counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub id: String,
    pub event_count: usize,
    pub est_bytes: usize,
    pub priority: GroupPriority,
    pub oldest_timestamp: Option<u64>,
    pub newest_timestamp: Option<u64>,
}

/// Ingest throughput
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub events_per_second: f64,
    pub last_event_ms: Option<u64>,
}

/// Full statistics payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    /// Events ingested since startup
    pub total_events: u64,
    /// Events currently held across all groups
    pub event_count: usize,
    pub group_count: usize,
    pub memory: MemoryStats,
    pub groups: Vec<GroupStats>,
    pub performance: PerformanceStats,
    pub query_cache: QueryCacheStats,
}

/// Overall health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    pub memory_usage_percent: f64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_serialization() {
        let health = HealthStatus {
            status: HealthState::Degraded,
            memory_usage_percent: 84.2,
            error_count: 1,
            last_error: Some("boom".into()),
            issues: vec!["memory usage high".into()],
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["issues"][0], "memory usage high");
    }
}
