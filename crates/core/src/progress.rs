//! Progress persistence: the trait the dispatcher records campaign progress
//! through.
//!
//! The dispatcher accepts an `Arc<dyn ProgressStore>`; writes are best
//! effort and a failing store never aborts a dispatch.

use crate::campaign::CampaignStatus;
use crate::error::{CampaignError, CampaignResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// External collaborator that stores campaign progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Incremental update of the sent counter while a campaign is running.
    async fn update_sent_count(&self, campaign_id: &str, sent_count: u64) -> CampaignResult<()>;

    /// Final counters together with the terminal status.
    async fn finalize(
        &self,
        campaign_id: &str,
        sent_count: u64,
        failed_count: u64,
        status: CampaignStatus,
    ) -> CampaignResult<()>;
}

/// Latest known state of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgress {
    pub campaign_id: String,
    pub sent_count: u64,
    pub failed_count: u64,
    pub status: CampaignStatus,
    pub updated_at: DateTime<Utc>,
}

/// In-memory store keyed by campaign id. Also counts writes, which the
/// tests use to check how often the dispatcher persists.
#[derive(Default)]
pub struct InMemoryProgressStore {
    campaigns: DashMap<String, CampaignProgress>,
    incremental_writes: DashMap<String, u64>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, campaign_id: &str) -> Option<CampaignProgress> {
        self.campaigns.get(campaign_id).map(|p| p.clone())
    }

    /// Number of incremental `sent_count` writes seen for a campaign.
    pub fn incremental_writes(&self, campaign_id: &str) -> u64 {
        self.incremental_writes
            .get(campaign_id)
            .map(|c| *c)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn update_sent_count(&self, campaign_id: &str, sent_count: u64) -> CampaignResult<()> {
        let now = Utc::now();
        self.campaigns
            .entry(campaign_id.to_string())
            .and_modify(|p| {
                p.sent_count = sent_count;
                p.updated_at = now;
            })
            .or_insert_with(|| CampaignProgress {
                campaign_id: campaign_id.to_string(),
                sent_count,
                failed_count: 0,
                status: CampaignStatus::Sending,
                updated_at: now,
            });
        *self
            .incremental_writes
            .entry(campaign_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn finalize(
        &self,
        campaign_id: &str,
        sent_count: u64,
        failed_count: u64,
        status: CampaignStatus,
    ) -> CampaignResult<()> {
        if !status.is_terminal() {
            return Err(CampaignError::Persistence(format!(
                "finalize called with non-terminal status {status:?}"
            )));
        }
        self.campaigns.insert(
            campaign_id.to_string(),
            CampaignProgress {
                campaign_id: campaign_id.to_string(),
                sent_count,
                failed_count,
                status,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}
