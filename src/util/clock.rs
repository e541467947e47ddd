//! Wall-clock helpers shared by lease records, registry timestamps and audit events.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch. Returns 0 if the system clock is before the epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Absolute expiry (ms since epoch) for a TTL starting now.
pub fn expiry_after(ttl: Duration) -> u128 {
    now_ms().saturating_add(ttl.as_millis())
}
