//! Time helpers
//!
//! Event timestamps are monotonic nanoseconds so ring-buffer ordering is
//! immune to wall-clock jumps; the wall-clock millisecond form rides along
//! for display only.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since process start
pub fn monotonic_ns() -> u64 {
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_nanos() as u64
}

/// Wall-clock milliseconds since the Unix epoch
pub fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds expressed as monotonic nanoseconds
pub fn ms_to_ns(ms: u64) -> u64 {
    ms.saturating_mul(1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_decreases() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_wall_ms_is_recent() {
        // Any time after 2020-01-01 counts as sane here
        assert!(wall_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_ms_to_ns() {
        assert_eq!(ms_to_ns(3), 3_000_000);
        assert_eq!(ms_to_ns(u64::MAX), u64::MAX);
    }
}
