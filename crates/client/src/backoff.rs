//! Exponential backoff for the job-list fetch before the first snapshot
//! has been loaded.
//!
//! Once a snapshot exists the fetcher falls back to its normal poll
//! interval and keeps the stale data on failure, so backoff only matters
//! while there is nothing to show yet.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Running backoff state: the delay to wait after the next failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
            attempts: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn fail(&mut self) -> Duration {
        self.attempts += 1;
        let delay = self.current;
        self.current = next_delay(self.current, &self.config);
        delay
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = BackoffConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let mut backoff = Backoff::default();
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(backoff.fail().as_secs(), expected_secs);
        }
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::default();
        backoff.fail();
        backoff.fail();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.fail(), Duration::from_secs(1));
    }
}
