//! The backoff-timer collaborator (spec §6): `success()`, `failure()`,
//! `get_interval()`. `ReaderRdy` owns one of these and consults it only when
//! entering/leaving its global `BACKOFF` state.
//!
//! Built on the `backoff` crate's exponential growth, the same dependency
//! another Rust NSQ client in this codebase's lineage reaches for when
//! wiring up its own reconnect/backoff handling.

use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::ExponentialBackoff;

/// Produces a current backoff interval from a sequence of success/failure
/// signals. Implementations need not be thread-safe: per spec §5, the core
/// only ever touches this from the single task driving `ReaderRdy`.
pub trait BackoffTimer: std::fmt::Debug + Send {
    fn success(&mut self);
    fn failure(&mut self);
    fn get_interval(&self) -> Duration;
}

/// Exponential backoff capped at `max_backoff_duration`, reset to the
/// initial interval on success.
#[derive(Debug)]
pub struct ExponentialBackoffTimer {
    backoff: ExponentialBackoff,
    current: Duration,
}

impl ExponentialBackoffTimer {
    pub fn new(max_backoff_duration: Duration) -> Self {
        let mut backoff = ExponentialBackoff {
            max_interval: max_backoff_duration,
            // The spec's `getInterval()` is a deterministic function of the
            // success/failure sequence; jitter would make `ReaderRdy`'s
            // scheduled wake-up non-reproducible for no benefit here.
            randomization_factor: 0.0,
            ..ExponentialBackoff::default()
        };
        // A consumer backs off for as long as failures keep arriving; there is
        // no overall deadline after which we give up and stop retrying.
        backoff.max_elapsed_time = None;
        backoff.reset();

        let current = backoff.initial_interval;
        ExponentialBackoffTimer { backoff, current }
    }
}

impl BackoffTimer for ExponentialBackoffTimer {
    fn success(&mut self) {
        self.backoff.reset();
        self.current = self.backoff.initial_interval;
    }

    fn failure(&mut self) {
        self.current = self
            .backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval);
    }

    fn get_interval(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_failure_and_caps_at_max() {
        let mut timer = ExponentialBackoffTimer::new(Duration::from_secs(1));
        let first = timer.get_interval();

        timer.failure();
        let second = timer.get_interval();
        assert!(second >= first);

        for _ in 0..20 {
            timer.failure();
        }
        assert!(timer.get_interval() <= Duration::from_secs(1) + Duration::from_millis(1));
    }

    #[test]
    fn success_resets_to_initial() {
        let mut timer = ExponentialBackoffTimer::new(Duration::from_secs(30));
        let initial = timer.get_interval();

        timer.failure();
        timer.failure();
        assert!(timer.get_interval() > initial);

        timer.success();
        assert_eq!(timer.get_interval(), initial);
    }
}
