use once_cell::sync::Lazy;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static START: Lazy<Instant> = Lazy::new(Instant::now);

/// Sentinel stored by a thread that is outside any epoch.
pub const MAX_TIME: u64 = u64::MAX;

/// Coarse monotonic milliseconds since process start. All epoch, retire and
/// expiry bookkeeping runs on this clock.
pub fn steady_ms() -> u64 {
    START.elapsed().as_millis() as u64
}

/// Wallclock milliseconds since the unix epoch; only used for persisted
/// sync timestamps.
pub fn system_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
