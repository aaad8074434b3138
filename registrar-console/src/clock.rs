#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

/// Abstraction for deterministic testing.
pub trait TimeSource: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        u64::try_from(ms).unwrap_or(u64::MAX)
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now_ms: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.now_ms
            .fetch_add(secs.saturating_mul(1_000), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
