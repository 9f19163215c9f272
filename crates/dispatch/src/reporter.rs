//! Best-effort progress persistence for a running dispatch.

use campaign_core::{CampaignResult, CampaignStatus, ProgressStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Writes the sent counter every `every_batches` completed batches
/// (counted across all workers) and the final counters once.
///
/// Store errors are logged and counted, never returned. Writes are awaited
/// in order so a late incremental update cannot overwrite the final one,
/// and each is bounded by `write_timeout`.
pub struct ProgressReporter {
    store: Arc<dyn ProgressStore>,
    campaign_id: String,
    every_batches: u32,
    write_timeout: Duration,
    batches_completed: u64,
    writes_failed: u64,
}

impl ProgressReporter {
    /// `every_batches == 0` disables incremental updates.
    pub fn new(
        store: Arc<dyn ProgressStore>,
        campaign_id: impl Into<String>,
        every_batches: u32,
        write_timeout: Duration,
    ) -> Self {
        Self {
            store,
            campaign_id: campaign_id.into(),
            every_batches,
            write_timeout,
            batches_completed: 0,
            writes_failed: 0,
        }
    }

    pub async fn batch_completed(&mut self, sent_count: u64) {
        self.batches_completed += 1;
        if self.every_batches == 0 || self.batches_completed % u64::from(self.every_batches) != 0 {
            return;
        }

        let write = self.store.update_sent_count(&self.campaign_id, sent_count);
        let written = bounded(self.write_timeout, write).await;
        match written {
            Ok(()) => debug!(
                campaign_id = %self.campaign_id,
                sent_count,
                batches = self.batches_completed,
                "Progress saved"
            ),
            Err(e) => self.write_failed("update_sent_count", &e),
        }
    }

    pub async fn finalize(&mut self, sent_count: u64, failed_count: u64, status: CampaignStatus) {
        let write = self
            .store
            .finalize(&self.campaign_id, sent_count, failed_count, status);
        let written = bounded(self.write_timeout, write).await;
        if let Err(e) = written {
            self.write_failed("finalize", &e);
        }
    }

    pub fn batches_completed(&self) -> u64 {
        self.batches_completed
    }

    pub fn writes_failed(&self) -> u64 {
        self.writes_failed
    }

    fn write_failed(&mut self, operation: &'static str, error: &dyn std::fmt::Display) {
        self.writes_failed += 1;
        metrics::counter!("dispatch.progress_write_errors").increment(1);
        warn!(
            campaign_id = %self.campaign_id,
            operation,
            error = %error,
            "Failed to persist campaign progress"
        );
    }
}

/// Await one store write for at most `limit`.
async fn bounded(
    limit: Duration,
    write: impl Future<Output = CampaignResult<()>>,
) -> Result<(), String> {
    match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {limit:?}")),
    }
}
