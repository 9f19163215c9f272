//! Send pacing: the minimum delay for a target rate and the per-send
//! stagger derived from it.

use campaign_core::config::DispatchConfig;
use std::time::Duration;

const MS_PER_HOUR: u64 = 3_600_000;
const MS_PER_SECOND: u64 = 1_000;

/// Converts a target throughput into a delay between consecutive sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    min_delay: Duration,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self { min_delay }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(Duration::from_millis(config.min_delay_ms))
    }

    /// Delay for `emails_per_hour`, never below the configured floor.
    /// A rate of zero is treated as one email per hour.
    pub fn delay_per_hour(&self, emails_per_hour: u32) -> Duration {
        self.floored(MS_PER_HOUR / u64::from(emails_per_hour.max(1)))
    }

    /// Delay for `emails_per_second`, never below the configured floor.
    pub fn delay_per_second(&self, emails_per_second: u32) -> Duration {
        self.floored(MS_PER_SECOND / u64::from(emails_per_second.max(1)))
    }

    fn floored(&self, millis: u64) -> Duration {
        Duration::from_millis(millis).max(self.min_delay)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

/// Stagger applied before each send.
///
/// A worker's start is shifted by `worker_index * worker_stagger`, and the
/// sends of one batch are spread evenly over one rate delay. The offsets
/// depend only on the position inside the batch, so every batch of a
/// worker repeats the same pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySchedule {
    rate_delay: Duration,
    batch_size: usize,
    worker_stagger: Duration,
}

impl DelaySchedule {
    pub fn new(rate_delay: Duration, batch_size: usize, worker_stagger: Duration) -> Self {
        Self {
            rate_delay,
            batch_size: batch_size.max(1),
            worker_stagger,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Spacing between two sends of the same batch.
    pub fn slot(&self) -> Duration {
        let slots = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        self.rate_delay / slots
    }

    pub fn send_delay(&self, worker_index: usize, index_in_batch: usize) -> Duration {
        self.worker_stagger.saturating_mul(saturating_u32(worker_index))
            + self.slot().saturating_mul(saturating_u32(index_in_batch))
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
