//! Injectable time source.
//!
//! All lifecycle timestamps (`since`, `created_at`, ...) are nanoseconds
//! since the Unix epoch, taken from a [`Clock`] so that convergence and
//! lifecycle logic can be driven deterministically in tests.

use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Source of wall-clock time in epoch nanoseconds.
pub trait Clock: Send + Sync {
    /// Current time as nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_nanos(&self) -> i64 {
        (**self).now_nanos()
    }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
pub struct FakeClock {
    now_nanos: AtomicI64,
}

impl FakeClock {
    /// Create a fake clock at the given epoch-nanosecond instant.
    pub fn new(now_nanos: i64) -> Arc<Self> {
        Arc::new(Self {
            now_nanos: AtomicI64::new(now_nanos),
        })
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_nanos.fetch_add(by.as_nanos() as i64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, now_nanos: i64) {
        self.now_nanos.store(now_nanos, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_nanos(&self) -> i64 {
        self.now_nanos.load(Ordering::SeqCst)
    }
}

/// Nanoseconds elapsed since `then_nanos` at `now_nanos`, saturating at zero
/// for timestamps in the future.
pub fn nanos_since(now_nanos: i64, then_nanos: i64) -> i64 {
    (now_nanos - then_nanos).max(0)
}
