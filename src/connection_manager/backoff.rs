//! Exponential backoff for reconnect scheduling

use std::time::Duration;

use rand::Rng;

/// Reconnect backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Retries allowed before giving up
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0); 0.0 gives the exact doubling sequence
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            jitter_factor: 0.0,
        }
    }
}

/// Bounded exponential backoff: `base * 2^(attempt - 1)` for attempts `1..=max_attempts`
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consume one attempt and return its delay, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;

        let exponent = (self.attempt - 1).min(31);
        let base_ms = self.config.base_delay.as_millis() as f64;
        let delay_ms = base_ms * f64::from(1u32 << exponent);

        // Apply jitter only if jitter_factor > 0
        let final_ms = if self.config.jitter_factor > 0.0 {
            let jitter_range = delay_ms * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (delay_ms + jitter).max(1.0)
        } else {
            delay_ms
        };

        Some(Duration::from_millis(final_ms as u64))
    }

    /// Reset after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts consumed since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(max_attempts: u32) -> ReconnectBackoff {
        ReconnectBackoff::new(BackoffConfig {
            base_delay: Duration::from_millis(1000),
            max_attempts,
            jitter_factor: 0.0,
        })
    }

    #[test]
    fn test_delays_double_until_exhausted() {
        let mut backoff = backoff(5);

        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.attempts(), 5);
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut backoff = backoff(2);
        backoff.next_delay();
        backoff.next_delay();
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let mut backoff = backoff(0);
        assert!(backoff.is_exhausted());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig {
            base_delay: Duration::from_millis(1000),
            max_attempts: 3,
            jitter_factor: 0.1,
        });

        let first = backoff.next_delay().unwrap().as_millis();
        assert!((900..=1100).contains(&first));
        let second = backoff.next_delay().unwrap().as_millis();
        assert!((1800..=2200).contains(&second));
    }
}
