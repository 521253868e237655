//! # FieldKit Common
//!
//! Logging configuration and time utilities shared by the FieldKit crates.
//!
//! ## Features
//!
//! - Logging setup on top of `tracing-subscriber`
//! - An injectable wall clock so suppression windows and cache timestamps
//!   can be tested without sleeping

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};

/// Source of wall-clock time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the epoch.
    fn now_millis(&self) -> i64;

    /// Current time as a UTC timestamp.
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock frozen at `millis`.
    pub fn at(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: chrono::Duration) {
        self.millis
            .fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// The default shared clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at(1_000);
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(clock.now_millis(), 3_000);

        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_manual_clock_is_shared_between_clones() {
        let clock = ManualClock::at(0);
        let other = clock.clone();
        clock.advance(chrono::Duration::days(7));
        assert_eq!(other.now_millis(), 7 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn test_system_clock_now_matches_millis() {
        let clock = SystemClock;
        let millis = clock.now_millis();
        assert!(clock.now().timestamp_millis() >= millis);
    }
}
