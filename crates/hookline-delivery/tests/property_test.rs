//! Property-based tests for the end-of-pass state transition.

use chrono::{DateTime, TimeZone, Utc};
use hookline_core::models::{MessageStatus, RETRY_LIMIT_EXCEEDED};
use hookline_delivery::{engine::conclude_pass, retry::FixedInterval};
use hookline_testing::MessageBuilder;
use proptest::prelude::*;

/// Creates property test configuration based on environment.
///
/// `PROPTEST_CASES` overrides the case count; CI defaults to 256.
fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 256 } else { 64 };

    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);

    ProptestConfig::with_cases(cases)
}

fn started_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Every completed pass counts exactly one trial.
    #[test]
    fn trial_count_increments_by_one(
        trial_count in 0u32..1_000,
        retry_limit in 0u32..1_000,
        all_sent in any::<bool>(),
    ) {
        let mut message =
            MessageBuilder::new().trial_count(trial_count).retry_limit(retry_limit).build();

        conclude_pass(&mut message, all_sent, started_at(), &FixedInterval);

        prop_assert_eq!(message.metadata.trial_count, trial_count + 1);
    }

    /// Reaching the retry limit always wins, whatever the pass achieved.
    #[test]
    fn retry_limit_forces_failure(
        trial_count in 0u32..100,
        retry_limit in 0u32..100,
        all_sent in any::<bool>(),
    ) {
        let mut message =
            MessageBuilder::new().trial_count(trial_count).retry_limit(retry_limit).build();

        conclude_pass(&mut message, all_sent, started_at(), &FixedInterval);

        let exhausted = trial_count + 1 >= retry_limit;
        let expected = match (exhausted, all_sent) {
            (true, _) => MessageStatus::Failure,
            (false, true) => MessageStatus::Success,
            (false, false) => MessageStatus::Retry,
        };
        prop_assert_eq!(message.status, expected);
        prop_assert_eq!(message.description == RETRY_LIMIT_EXCEEDED, exhausted);
    }

    /// A retry is always scheduled exactly one interval after the pass began.
    #[test]
    fn retry_schedule_follows_interval(interval_seconds in 0u64..86_400 * 30) {
        let mut message =
            MessageBuilder::new().retry_limit(u32::MAX).interval_seconds(interval_seconds).build();

        conclude_pass(&mut message, false, started_at(), &FixedInterval);

        prop_assert_eq!(message.status, MessageStatus::Retry);
        let expected_seconds = i64::try_from(interval_seconds).unwrap();
        prop_assert_eq!(
            message.metadata.next_send_time,
            Some(started_at() + chrono::Duration::seconds(expected_seconds))
        );
    }

    /// A fully delivered pass below the limit leaves the schedule untouched.
    #[test]
    fn success_never_schedules_retry(retry_limit in 2u32..100) {
        let mut message = MessageBuilder::new().retry_limit(retry_limit).build();

        conclude_pass(&mut message, true, started_at(), &FixedInterval);

        prop_assert_eq!(message.status, MessageStatus::Success);
        prop_assert!(message.metadata.next_send_time.is_none());
    }
}
