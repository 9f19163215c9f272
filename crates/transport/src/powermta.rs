//! PowerMTA injection over SMTP.
//!
//! PowerMTA accepts mail on a plain SMTP listener and routes it by the
//! `X-Virtual-MTA` and `X-Job` headers.

use crate::smtp::{build_message, deliver, RelaySettings, SmtpEncryption};
use crate::{parse_account_config, Transport, TransportError};
use async_trait::async_trait;
use campaign_core::config::TransportConfig;
use campaign_core::PreparedEmail;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const ACCOUNT_TYPE: &str = "powermta";

const VIRTUAL_MTA_HEADER: &str = "X-Virtual-MTA";
const JOB_HEADER: &str = "X-Job";

/// `accountConfig` of a `powermta` account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerMtaAccountConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "vmta")]
    pub virtual_mta: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default = "default_encryption")]
    pub encryption: SmtpEncryption,
}

fn default_port() -> u16 {
    25
}

fn default_encryption() -> SmtpEncryption {
    SmtpEncryption::None
}

impl PowerMtaAccountConfig {
    /// Routing headers added to every message of this account.
    pub fn routing_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(2);
        if let Some(vmta) = &self.virtual_mta {
            headers.push((VIRTUAL_MTA_HEADER, vmta.clone()));
        }
        if let Some(job) = &self.job_id {
            headers.push((JOB_HEADER, job.clone()));
        }
        headers
    }
}

pub struct PowerMtaTransport {
    timeout: Duration,
}

impl PowerMtaTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.smtp_timeout_secs),
        }
    }
}

#[async_trait]
impl Transport for PowerMtaTransport {
    fn account_type(&self) -> &str {
        ACCOUNT_TYPE
    }

    async fn send(&self, email: &PreparedEmail) -> Result<(), TransportError> {
        let account: PowerMtaAccountConfig = parse_account_config(email)?;
        let message = build_message(email, &account.routing_headers())?;

        let settings = RelaySettings {
            host: account.host,
            port: account.port,
            encryption: account.encryption,
            username: account.username,
            password: account.password,
            timeout: self.timeout,
        };
        deliver(&settings, message).await?;

        debug!(
            to = %email.recipient,
            vmta = ?account.virtual_mta,
            "PowerMTA accepted message"
        );
        Ok(())
    }
}
