//! Time abstractions for testable scheduling.
//!
//! Delivery passes stamp attempts and compute the next send time from an
//! injected clock, so retry schedules can be asserted exactly in tests. Only
//! wall-clock UTC is modelled; durations are measured with `Instant` directly.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Source of the current time and of scheduler sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Waits for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock with microsecond resolution.
///
/// Time only moves on [`advance`](Self::advance) or when code under test
/// sleeps on it. Clones share the same time.
#[derive(Debug, Clone)]
pub struct TestClock {
    micros: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a clock frozen at the current system time.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Creates a clock frozen at `start`.
    pub fn at(start: DateTime<Utc>) -> Self {
        Self { micros: Arc::new(AtomicI64::new(start.timestamp_micros())) }
    }

    /// Moves the clock forward by `duration`, saturating at the far future.
    pub fn advance(&self, duration: Duration) {
        let step = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        let _ = self.micros.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_add(step))
        });
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::Acquire))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn clock_is_frozen_until_advanced() {
        let clock = TestClock::at(start());
        assert_eq!(clock.now_utc(), start());

        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now_utc(), start() + chrono::Duration::seconds(60));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::at(start());
        let other = clock.clone();

        other.advance(Duration::from_millis(1500));

        assert_eq!(clock.now_utc(), start() + chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn huge_advance_saturates() {
        let clock = TestClock::at(start());
        clock.advance(Duration::MAX);

        assert_eq!(clock.now_utc(), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn sleep_advances_instantly() {
        let clock = TestClock::at(start());

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now_utc(), start() + chrono::Duration::seconds(5));
    }

    proptest::proptest! {
        #[test]
        fn advances_accumulate(steps in proptest::collection::vec(0u64..1_000_000, 0..20)) {
            let clock = TestClock::at(start());

            for step in &steps {
                clock.advance(Duration::from_millis(*step));
            }

            let total: u64 = steps.iter().sum();
            let expected = start() + chrono::Duration::milliseconds(i64::try_from(total).unwrap());
            proptest::prop_assert_eq!(clock.now_utc(), expected);
        }
    }
}
