use std::f64::consts::SQRT_2;
use std::time::Duration;

use crate::config::{FRAME_LENGTH, MAX_BACKOFF};

/// Reconnect delay policy: `min(base * √2^attempt, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(FRAME_LENGTH, MAX_BACKOFF)
    }
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base.min(self.cap);
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * SQRT_2.powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs).min(self.cap)
    }
}

/// Attempt counter for one reconnection episode.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: Backoff,
    attempt: u32,
}

impl BackoffState {
    pub fn new(policy: Backoff) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_delay(&self) -> Duration {
        self.policy.delay(self.attempt)
    }

    /// Returns the delay for the current attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_delay();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Duration, expected_secs: f64) {
        let diff = (actual.as_secs_f64() - expected_secs).abs();
        assert!(
            diff < 1e-6,
            "expected {}s, got {:?}",
            expected_secs,
            actual
        );
    }

    #[test]
    fn test_first_delay_is_base() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), FRAME_LENGTH);
    }

    #[test]
    fn test_delay_grows_by_sqrt2() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        assert_close(backoff.delay(1), 0.1 * SQRT_2);
        assert_close(backoff.delay(2), 0.2);
        assert_close(backoff.delay(3), 0.2 * SQRT_2);
        assert_close(backoff.delay(4), 0.4);
    }

    #[test]
    fn test_delay_matches_formula_until_cap() {
        let backoff = Backoff::default();
        for attempt in 0..64 {
            let expected = (FRAME_LENGTH.as_secs_f64() * SQRT_2.powi(attempt as i32)).min(60.0);
            assert_close(backoff.delay(attempt), expected);
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(40), MAX_BACKOFF);
        assert_eq!(backoff.delay(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_delay_is_non_decreasing() {
        let backoff = Backoff::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..100 {
            let delay = backoff.delay(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_state_advances_and_resets() {
        let mut state = BackoffState::new(Backoff::new(
            Duration::from_millis(40),
            Duration::from_secs(60),
        ));

        assert_eq!(state.next_delay(), Duration::from_millis(40));
        assert_close(state.next_delay(), 0.04 * SQRT_2);
        assert_close(state.next_delay(), 0.08);
        assert_eq!(state.attempt(), 3);

        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.current_delay(), Duration::from_millis(40));
    }
}
