//! Process-wide startup timestamp.
//!
//! Captured once during boot and read lock-free afterwards. Correlation
//! files carry nanosecond epoch timestamps in their names; anything older
//! than this instant predates the current run and is discarded.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

static STARTUP_NS: OnceLock<i64> = OnceLock::new();

/// Record the startup instant. Later calls are no-ops.
pub fn init() -> i64 {
    *STARTUP_NS.get_or_init(now_ns)
}

/// Nanoseconds since the Unix epoch at process boot. Initializes on first
/// use so library consumers (and tests) need no explicit boot step.
pub fn timestamp_ns() -> i64 {
    init()
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_stable_across_calls() {
        let first = timestamp_ns();
        let second = timestamp_ns();
        assert_eq!(first, second);
        assert!(first > 0);
    }

    #[test]
    fn now_is_not_before_startup() {
        let startup = timestamp_ns();
        assert!(now_ns() >= startup);
    }
}
