//! Exponential backoff with optional full jitter.

use std::time::Duration;

use rand::Rng;

use crate::error::ConfigurationError;

/// Backoff schedule between retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per retry.
    pub factor: f64,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Replace each delay with a uniform sample from `[0, delay]`.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ConfigurationError::InvalidBackoff(format!(
                "factor must be a finite number >= 1, got {}",
                self.factor
            )));
        }
        Ok(())
    }

    /// Un-jittered delay for a zero-based retry `attempt`.
    ///
    /// `min(max, base * factor^attempt)`; saturates at `max` instead of
    /// overflowing for large attempts. A `base` above `max` yields `max`.
    /// Unvalidated negative factors floor at zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay to sleep before retry `attempt`, jitter applied when enabled.
    pub fn sleep_duration(&self, attempt: u32) -> Duration {
        self.sleep_duration_with(attempt, &mut rand::thread_rng())
    }

    pub fn sleep_duration_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        Duration::from_secs_f64(rng.gen_range(0.0..=delay.as_secs_f64())).min(delay)
    }
}
