//! Time utilities and constants for PriceDesk.

use chrono::{DateTime, Duration, Utc};

/// Timing constants shared by the conversion cache, the freshness monitor and
/// the rate synchronizer.
pub mod constants {
    use super::Duration;

    /// Lifetime of a cached conversion (5 minutes).
    pub fn conversion_ttl() -> Duration {
        Duration::minutes(5)
    }

    /// Interval of the proactive expired-entry sweep (60 seconds).
    pub fn cache_sweep_interval() -> Duration {
        Duration::seconds(60)
    }

    /// Interval between freshness re-evaluations (30 seconds).
    pub fn freshness_check_interval() -> Duration {
        Duration::seconds(30)
    }

    /// Age after which exchange-rate data is reported stale (24 hours).
    pub fn stale_threshold() -> Duration {
        Duration::hours(24)
    }

    /// Age after which local rate data is refreshed opportunistically (30 minutes).
    pub fn rate_refresh_interval() -> Duration {
        Duration::minutes(30)
    }

    /// Pause between preload batches (100 milliseconds).
    pub fn preload_batch_pause() -> Duration {
        Duration::milliseconds(100)
    }

    /// Timeout for a single upstream HTTP request (10 seconds).
    pub fn http_timeout() -> Duration {
        Duration::seconds(10)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Source of the current time.
///
/// Everything that compares ages against thresholds takes a clock instead of
/// calling [`Utc::now`] directly.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Timestamp;

    /// Time elapsed since `earlier`, clamped at zero.
    fn elapsed_since(&self, earlier: Timestamp) -> Duration {
        let elapsed = self.now() - earlier;
        if elapsed < Duration::zero() {
            Duration::zero()
        } else {
            elapsed
        }
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<Timestamp>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Create a clock frozen at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::starting_now();
        let start = clock.now();

        clock.advance(Duration::minutes(3));

        assert_eq!(clock.now() - start, Duration::minutes(3));
        assert_eq!(clock.elapsed_since(start), Duration::minutes(3));
    }

    #[test]
    fn test_elapsed_since_future_is_zero() {
        let clock = ManualClock::starting_now();
        let future = clock.now() + Duration::seconds(10);
        assert_eq!(clock.elapsed_since(future), Duration::zero());
    }

    #[test]
    fn test_negative_duration_as_std() {
        assert_eq!(Duration::seconds(-5).as_std(), std::time::Duration::ZERO);
        assert_eq!(
            constants::preload_batch_pause().as_std(),
            std::time::Duration::from_millis(100)
        );
    }
}
