//! Adaptive commit timer.

use std::time::Duration;

/// Paces commit cycles with exponential backoff.
///
/// After `n` consecutive failures the interval is `min(base * 2^n, max)`.
/// Any success resets it to `base`. A fire that arrives while a cycle is in
/// flight is coalesced into that cycle.
#[derive(Debug, Clone)]
pub struct CommitScheduler {
    base: Duration,
    max: Duration,
    consecutive_failures: u32,
    in_flight: bool,
    coalesced: u64,
}

impl CommitScheduler {
    /// Creates a scheduler. `max` is raised to `base` if it is lower.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            consecutive_failures: 0,
            in_flight: false,
            coalesced: 0,
        }
    }

    /// Interval until the next fire.
    pub fn interval(&self) -> Duration {
        let factor = 1u32
            .checked_shl(self.consecutive_failures)
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// The interval used while the store is healthy.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Number of failed cycles since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns true while a cycle is running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Fires that were coalesced into a running cycle.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Starts a cycle. Returns false if one is already running.
    pub fn begin(&mut self) -> bool {
        if self.in_flight {
            self.coalesced += 1;
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Ends the running cycle and returns the interval to re-arm with.
    pub fn finish(&mut self, success: bool) -> Duration {
        self.in_flight = false;
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        self.interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scheduler() -> CommitScheduler {
        CommitScheduler::new(Duration::from_millis(1000), Duration::from_millis(5000))
    }

    #[test]
    fn starts_at_base() {
        let scheduler = scheduler();
        assert_eq!(scheduler.interval(), Duration::from_millis(1000));
        assert_eq!(scheduler.consecutive_failures(), 0);
    }

    #[test]
    fn doubles_until_capped() {
        let mut scheduler = scheduler();
        let intervals: Vec<_> = (0..4)
            .map(|_| {
                scheduler.begin();
                scheduler.finish(false).as_millis()
            })
            .collect();
        assert_eq!(intervals, vec![2000, 4000, 5000, 5000]);
    }

    #[test]
    fn success_resets() {
        let mut scheduler = scheduler();
        scheduler.begin();
        scheduler.finish(false);
        scheduler.begin();
        scheduler.finish(false);
        scheduler.begin();
        assert_eq!(scheduler.finish(true), Duration::from_millis(1000));
        assert_eq!(scheduler.consecutive_failures(), 0);
    }

    #[test]
    fn fires_during_a_cycle_are_coalesced() {
        let mut scheduler = scheduler();
        assert!(scheduler.begin());
        assert!(!scheduler.begin());
        assert!(!scheduler.begin());
        assert!(scheduler.is_in_flight());
        assert_eq!(scheduler.coalesced(), 2);
        scheduler.finish(true);
        assert!(scheduler.begin());
    }

    #[test]
    fn max_below_base_is_raised() {
        let scheduler = CommitScheduler::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(scheduler.interval(), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn interval_after_failures(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            failures in 0u32..80,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(base_ms + extra_ms);
            let mut scheduler = CommitScheduler::new(base, max);
            for _ in 0..failures {
                scheduler.begin();
                scheduler.finish(false);
            }

            let expected = if failures >= 32 {
                max
            } else {
                Duration::from_millis(base_ms.saturating_mul(1u64 << failures)).min(max)
            };
            prop_assert_eq!(scheduler.interval(), expected);

            scheduler.begin();
            prop_assert_eq!(scheduler.finish(true), base);
        }
    }
}
