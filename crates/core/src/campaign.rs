//! Dispatch request/response types and the per-run campaign counters.

use crate::config::DispatchConfig;
use crate::email::{PreparedEmail, SendResult};
use crate::error::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};

/// Maximum length accepted for a campaign identifier.
const MAX_CAMPAIGN_ID_LEN: usize = 256;
const SECONDS_PER_HOUR: u32 = 3600;

/// Unit of `rateLimit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnit {
    #[default]
    Hour,
    Second,
}

/// Copy of a delivered email sent to a monitoring inbox after every
/// `after_every` successful sends of the run. Zero disables it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEmailSettings {
    pub recipient: String,
    pub after_every: u64,
}

/// Incoming bulk-dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub campaign_id: String,
    pub prepared_emails: Vec<PreparedEmail>,
    /// Target throughput in `rate_unit`. Falls back to the configured
    /// default.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub rate_unit: RateUnit,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_email: Option<TestEmailSettings>,
}

impl DispatchRequest {
    pub fn rate_limit_or_default(&self, config: &DispatchConfig) -> u32 {
        self.rate_limit.unwrap_or(config.default_rate_limit)
    }

    /// The requested rate expressed in emails per hour.
    pub fn target_emails_per_hour(&self, config: &DispatchConfig) -> u32 {
        let rate = self.rate_limit_or_default(config);
        match self.rate_unit {
            RateUnit::Hour => rate,
            RateUnit::Second => rate.saturating_mul(SECONDS_PER_HOUR),
        }
    }

    pub fn batch_size_or_default(&self, config: &DispatchConfig) -> usize {
        self.batch_size.unwrap_or(config.default_batch_size)
    }

    /// Reject structurally invalid requests before any email is sent.
    pub fn validate(&self, config: &DispatchConfig) -> CampaignResult<()> {
        if self.campaign_id.trim().is_empty() {
            return Err(CampaignError::Validation(
                "campaignId must not be empty".into(),
            ));
        }
        if self.campaign_id.len() > MAX_CAMPAIGN_ID_LEN {
            return Err(CampaignError::Validation(
                "campaignId exceeds maximum length".into(),
            ));
        }
        if self.rate_limit_or_default(config) == 0 {
            return Err(CampaignError::Validation(
                "rateLimit must be greater than zero".into(),
            ));
        }
        let batch_size = self.batch_size_or_default(config);
        if batch_size == 0 {
            return Err(CampaignError::Validation(
                "batchSize must be greater than zero".into(),
            ));
        }
        if batch_size > config.max_batch_size {
            return Err(CampaignError::Validation(format!(
                "batchSize exceeds maximum of {}",
                config.max_batch_size
            )));
        }
        if self.prepared_emails.len() > config.max_emails_per_request {
            return Err(CampaignError::Validation(format!(
                "preparedEmails exceeds maximum of {}",
                config.max_emails_per_request
            )));
        }
        if let Some(test_email) = &self.test_email {
            if !test_email.recipient.contains('@') {
                return Err(CampaignError::Validation(
                    "testEmail.recipient must be an email address".into(),
                ));
            }
        }
        for (i, email) in self.prepared_emails.iter().enumerate() {
            if email.recipient.trim().is_empty() {
                return Err(CampaignError::Validation(format!(
                    "preparedEmails[{i}].recipient must not be empty"
                )));
            }
            if email.account_type.trim().is_empty() {
                return Err(CampaignError::Validation(format!(
                    "preparedEmails[{i}].accountType must not be empty"
                )));
            }
            if email.account_id.trim().is_empty() {
                return Err(CampaignError::Validation(format!(
                    "preparedEmails[{i}].accountId must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Lifecycle status reported to the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Sending,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    /// Terminal status for a finished run. `cancelled` means at least one
    /// email was skipped because the run was cancelled.
    pub fn terminal(sent: u64, failed: u64, cancelled: bool) -> Self {
        if cancelled {
            CampaignStatus::Cancelled
        } else if sent == 0 && failed > 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Completed
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CampaignStatus::Sending)
    }
}

/// Counters for one dispatch invocation. Owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRunState {
    pub campaign_id: String,
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_recipients: u64,
}

impl CampaignRunState {
    pub fn new(campaign_id: impl Into<String>, total_recipients: u64) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            total_sent: 0,
            total_failed: 0,
            total_recipients,
        }
    }

    pub fn record(&mut self, result: &SendResult) {
        if result.success {
            self.total_sent += 1;
        } else {
            self.total_failed += 1;
        }
        debug_assert!(self.processed() <= self.total_recipients);
    }

    pub fn processed(&self) -> u64 {
        self.total_sent + self.total_failed
    }

    /// Percentage of processed emails that were sent, rounded to 2 decimals.
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 0.0;
        }
        round2(self.total_sent as f64 / processed as f64 * 100.0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Final report returned to the caller of a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub success: bool,
    pub campaign_id: String,
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_emails: u64,
    pub success_rate: f64,
    pub actual_emails_per_hour: u64,
    pub target_emails_per_hour: u32,
    pub accounts_used: usize,
    pub execution_time_ms: u64,
    pub sample_results: Vec<SendResult>,
}
