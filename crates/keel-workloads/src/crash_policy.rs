//! Crash and restart policy for actual LRPs.

use std::time::Duration;

/// Thresholds governing crash accounting and restart back-off.
#[derive(Debug, Clone)]
pub struct CrashPolicy {
    /// A Running record older than this has its crash count forgiven
    /// before the next crash is counted.
    pub reset_timeout: Duration,
    /// Crash counts above this take the record to Crashed instead of back
    /// to Unclaimed.
    pub max_crash_count: i32,
    /// The first crashes restart immediately, without back-off.
    pub num_immediate_restarts: i32,
    /// Base delay of the exponential back-off after the immediate restarts
    /// are used up.
    pub base_backoff: Duration,
    /// Upper bound on the back-off delay.
    pub max_backoff: Duration,
    /// Crash counts at or above this are never restarted by convergence.
    pub never_restart_threshold: i32,
}

impl Default for CrashPolicy {
    fn default() -> Self {
        Self {
            reset_timeout: Duration::from_secs(5 * 60),
            max_crash_count: 3,
            num_immediate_restarts: 3,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(16 * 60),
            never_restart_threshold: 200,
        }
    }
}

impl CrashPolicy {
    /// Delay convergence waits before restarting a record with the given
    /// crash count; `None` if it is never restarted.
    pub fn restart_delay(&self, crash_count: i32) -> Option<Duration> {
        if crash_count >= self.never_restart_threshold {
            return None;
        }
        if crash_count <= self.num_immediate_restarts {
            return Some(Duration::ZERO);
        }

        let exponent = (crash_count - self.num_immediate_restarts - 1).min(30) as u32;
        let delay = self
            .base_backoff
            .checked_mul(1u32 << exponent.min(31))
            .unwrap_or(self.max_backoff);
        Some(delay.min(self.max_backoff))
    }

    /// True when a Crashed record with `crash_count`, crashed at
    /// `since_nanos`, is due for a restart at `now_nanos`.
    pub fn should_restart_now(&self, crash_count: i32, since_nanos: i64, now_nanos: i64) -> bool {
        match self.restart_delay(crash_count) {
            None => false,
            Some(delay) => {
                let waited = (now_nanos - since_nanos).max(0) as u128;
                waited >= delay.as_nanos()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_crashes_restart_immediately() {
        let policy = CrashPolicy::default();
        for count in 1..=3 {
            assert_eq!(policy.restart_delay(count), Some(Duration::ZERO));
            assert!(policy.should_restart_now(count, 1_000, 1_000));
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = CrashPolicy::default();
        assert_eq!(policy.restart_delay(4), Some(Duration::from_secs(30)));
        assert_eq!(policy.restart_delay(5), Some(Duration::from_secs(60)));
        assert_eq!(policy.restart_delay(6), Some(Duration::from_secs(120)));
        assert_eq!(policy.restart_delay(10), Some(Duration::from_secs(16 * 60)));
        assert_eq!(policy.restart_delay(50), Some(Duration::from_secs(16 * 60)));
    }

    #[test]
    fn never_restart_threshold_wins() {
        let policy = CrashPolicy::default();
        assert_eq!(policy.restart_delay(200), None);
        assert!(!policy.should_restart_now(200, 0, i64::MAX));
    }

    #[test]
    fn backoff_gates_on_elapsed_time() {
        let policy = CrashPolicy::default();
        let since = 0;
        let just_before = Duration::from_secs(30).as_nanos() as i64 - 1;
        let at = Duration::from_secs(30).as_nanos() as i64;

        assert!(!policy.should_restart_now(4, since, just_before));
        assert!(policy.should_restart_now(4, since, at));
    }
}
