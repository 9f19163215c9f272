//! Time source for the dispatcher.
//!
//! Workers never call `tokio::time` directly; they go through a
//! [`Scheduler`] so tests can observe the requested delays without
//! waiting for them.

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn sleep(&self, duration: Duration);

    fn now(&self) -> Instant;
}

/// Real timer backed by the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Records every requested delay and returns after a yield.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays in the order they were requested.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requested delays in ascending order.
    pub fn sorted_delays(&self) -> Vec<Duration> {
        let mut delays = self.delays();
        delays.sort();
        delays
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
