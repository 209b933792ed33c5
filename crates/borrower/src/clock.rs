//! Wall-clock time shared by the ticks and the wallet.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch; a clock before the epoch reads as 0.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
