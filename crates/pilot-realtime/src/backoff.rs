use std::time::Duration;

use rand::Rng;

/// Reconnect/backoff policy used by the channel actor.
///
/// Attempts are 1-indexed: attempt `n` waits `base_delay * factor^(n-1)`,
/// capped at `max_delay`, optionally blended with random jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_secs(300),
            factor: 2.0,
            jitter: 0.0,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("Reconnect base delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("Max reconnect delay must be >= reconnect base delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Whether another attempt may be scheduled after `failed` consecutive
    /// failures.
    pub fn allows(&self, failed: u32) -> bool {
        failed < self.max_attempts
    }

    /// Delay before the given 1-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let initial = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let scaled = initial * self.factor.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let base = if scaled.is_finite() {
            scaled.min(max)
        } else {
            max
        };

        if self.jitter == 0.0 {
            return Duration::try_from_secs_f64(base).unwrap_or(self.max_delay);
        }

        let mut rng = rand::rng();
        let randomized = rng.random_range(0.0..=base);
        let blended = base * (1.0 - self.jitter) + randomized * self.jitter;
        Duration::try_from_secs_f64(blended).unwrap_or(self.max_delay)
    }
}
