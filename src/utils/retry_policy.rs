use std::time::Duration;

/// Exponential backoff whose delays add up to roughly `total_time`.
///
/// With `max_retries = 3`, `total_time = 10s` and `multiplier = 1.5` the delays
/// are about 2.1s, 3.2s and 4.7s.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExponentialBackoff {
    max_retries: u64,
    base_delay: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    pub(crate) fn new(max_retries: u64, total_time: Duration, multiplier: f64) -> Self {
        let base_delay = if max_retries == 0 {
            Duration::ZERO
        } else if (multiplier - 1.0).abs() < f64::EPSILON {
            total_time / max_retries as u32
        } else {
            let series = (multiplier.powi(max_retries as i32) - 1.0) / (multiplier - 1.0);
            total_time.div_f64(series)
        };

        Self {
            max_retries,
            base_delay,
            multiplier,
        }
    }

    /// Getter for `max_retries`
    pub(crate) fn max_retries(&self) -> u64 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    pub(crate) fn get_delay(&self, attempt: u64) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exponent))
    }
}
