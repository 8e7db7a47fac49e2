use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use serde::Deserialize;

/// Bounded exponential backoff: `max_attempts` delays starting at
/// `initial_delay_ms`, multiplied by `factor` each time, capped at
/// `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub factor: u32,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            factor: 2,
            max_delay_ms: 4_000,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let max_interval = Duration::from_millis(self.max_delay_ms);
        let initial = Duration::from_millis(self.initial_delay_ms).min(max_interval);
        let mut backoff = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: 0.0,
            multiplier: f64::from(self.factor),
            max_interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        (0..self.max_attempts).map_while(move |_| backoff.next_backoff())
    }

    /// Upper bound on the time spent sleeping.
    pub fn total(&self) -> Duration {
        self.delays().sum()
    }
}
