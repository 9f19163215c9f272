#![warn(clippy::unwrap_used)]

pub mod campaign;
pub mod config;
pub mod email;
pub mod error;
pub mod progress;

pub use campaign::{
    CampaignRunState, CampaignStatus, DispatchRequest, DispatchSummary, RateUnit, TestEmailSettings,
};
pub use config::AppConfig;
pub use email::{AccountKey, PreparedEmail, SendResult};
pub use error::{CampaignError, CampaignResult};
pub use progress::{CampaignProgress, InMemoryProgressStore, ProgressStore};
