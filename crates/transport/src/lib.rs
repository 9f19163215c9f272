//! Sending-account transports.
//!
//! Each account type (`smtp`, `apps-script`, `powermta`) is one
//! [`Transport`] implementation; the dispatcher looks them up by type
//! string through the [`TransportRegistry`].

#![warn(clippy::unwrap_used)]

pub mod apps_script;
pub mod powermta;
pub mod registry;
pub mod smtp;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use async_trait::async_trait;
use campaign_core::PreparedEmail;
use std::time::Duration;
use thiserror::Error;

pub use apps_script::AppsScriptTransport;
pub use powermta::PowerMtaTransport;
pub use registry::TransportRegistry;
pub use smtp::SmtpTransport;

/// Error type for a single send attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The account configuration attached to the email is unusable.
    #[error("Invalid account config: {0}")]
    Config(String),

    /// The sender or recipient address could not be parsed.
    #[error("Invalid address: {0}")]
    Address(String),

    /// The MIME message could not be assembled.
    #[error("Message build error: {0}")]
    Build(String),

    /// SMTP transport-level failure (connection, auth, rejection).
    #[error("SMTP error: {0}")]
    Smtp(String),

    /// The Apps Script endpoint returned a non-2xx status.
    #[error("Apps Script HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The remote side answered but refused the message.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The underlying HTTP request failed (network, DNS, decoding).
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one prepared email through one kind of sending account.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The `accountType` string this transport serves.
    fn account_type(&self) -> &str;

    async fn send(&self, email: &PreparedEmail) -> Result<(), TransportError>;
}

/// Parse the account configuration embedded in an email.
pub(crate) fn parse_account_config<T: serde::de::DeserializeOwned>(
    email: &PreparedEmail,
) -> Result<T, TransportError> {
    serde_json::from_value(email.account_config.clone()).map_err(|e| {
        TransportError::Config(format!(
            "{} account {}: {e}",
            email.account_type, email.account_id
        ))
    })
}

/// Keep at most `limit` characters of a remote response body.
pub(crate) fn truncate_body(body: &str, limit: usize) -> String {
    body.chars().take(limit).collect()
}
