//! Exponential backoff between delivery attempts.

use chrono::Duration;

/// Backoff policy for failed deliveries.
///
/// # Default Values
///
/// - `initial_delay`: 1 second
/// - `max_delay`: 5 minutes
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier applied per additional failed attempt
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::seconds(1),
            max_delay: Duration::minutes(5),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Delay before the job may run again after `attempts` failed deliveries.
    ///
    /// `initial_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts <= 1 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempts - 1).unwrap_or(i32::MAX);
        let delay_ms =
            self.initial_delay.num_milliseconds() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.num_milliseconds() as f64 {
            self.max_delay
        } else {
            Duration::milliseconds(delay_ms as i64)
        }
    }
}
