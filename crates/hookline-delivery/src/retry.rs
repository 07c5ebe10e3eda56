//! Retry scheduling for messages with outstanding endpoints.
//!
//! Each message carries a strategy label, but scheduling goes through a
//! [`RetryPolicy`] chosen at engine construction. Only the fixed interval
//! ships; the label selects nothing on its own.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookline_core::models::MessageMetadata;

/// Computes the delay before the next delivery pass.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Returns how long to wait after a pass that left endpoints outstanding.
    ///
    /// `metadata.trial_count` already includes the pass that just finished.
    fn next_delay(&self, metadata: &MessageMetadata) -> Duration;

    /// Returns the next send time for a pass that started at `started_at`.
    fn next_send_time(
        &self,
        metadata: &MessageMetadata,
        started_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.next_delay(metadata))
            .unwrap_or(chrono::Duration::MAX);
        started_at.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Waits `interval_seconds` between passes regardless of the strategy label.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedInterval;

impl RetryPolicy for FixedInterval {
    fn next_delay(&self, metadata: &MessageMetadata) -> Duration {
        Duration::from_secs(metadata.interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use hookline_core::models::RetryStrategy;

    use super::*;

    fn metadata(interval_seconds: u64, strategy: RetryStrategy) -> MessageMetadata {
        MessageMetadata { interval_seconds, strategy, ..MessageMetadata::default() }
    }

    #[test]
    fn fixed_interval_uses_configured_seconds() {
        let delay = FixedInterval.next_delay(&metadata(60, RetryStrategy::Default));
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[test]
    fn fixed_interval_ignores_strategy_label() {
        let mut meta = metadata(30, RetryStrategy::ExponentialBackoff);
        meta.trial_count = 7;

        assert_eq!(FixedInterval.next_delay(&meta), Duration::from_secs(30));
    }

    #[test]
    fn next_send_time_offsets_pass_start() {
        let started_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = FixedInterval.next_send_time(&metadata(90, RetryStrategy::Default), started_at);

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 30).unwrap());
    }

    #[test]
    fn next_send_time_saturates() {
        let started_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = FixedInterval.next_send_time(&metadata(u64::MAX, RetryStrategy::Default), started_at);

        assert_eq!(next, DateTime::<Utc>::MAX_UTC);
    }
}
