//! Test doubles for code that drives transports.

use crate::{Transport, TransportError};
use async_trait::async_trait;
use campaign_core::PreparedEmail;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// In-memory transport that records every send and fails chosen
/// recipients with a fixed message.
pub struct RecordingTransport {
    account_type: String,
    failures: BTreeMap<String, String>,
    sent: Mutex<Vec<String>>,
    in_flight: Mutex<(usize, usize)>,
    latency: Duration,
}

impl RecordingTransport {
    pub fn new(account_type: impl Into<String>) -> Self {
        Self {
            account_type: account_type.into(),
            failures: BTreeMap::new(),
            sent: Mutex::new(Vec::new()),
            in_flight: Mutex::new((0, 0)),
            latency: Duration::ZERO,
        }
    }

    /// Make every send take `latency` of real time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make sends to `recipient` fail with `error`.
    pub fn failing_for(mut self, recipient: impl Into<String>, error: impl Into<String>) -> Self {
        self.failures.insert(recipient.into(), error.into());
        self
    }

    /// Recipients of every attempted send, in call order.
    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Highest number of sends that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
    }

    pub fn unique_recipients(&self) -> HashSet<String> {
        self.recipients().into_iter().collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn account_type(&self) -> &str {
        &self.account_type
    }

    async fn send(&self, email: &PreparedEmail) -> Result<(), TransportError> {
        {
            let mut guard = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.0 += 1;
            guard.1 = guard.1.max(guard.0);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email.recipient.clone());

        // Let sibling sends of the same batch start before this one resolves.
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }

        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0 -= 1;

        match self.failures.get(&email.recipient) {
            Some(error) => Err(TransportError::Rejected(error.clone())),
            None => Ok(()),
        }
    }
}
