//! SMTP relay transport.
//!
//! [`SmtpTransport`] wraps the `lettre` async SMTP client. The relay
//! credentials come from each email's `accountConfig`, so one transport
//! serves every SMTP account; a connection is opened per send.

use crate::{parse_account_config, Transport, TransportError};
use async_trait::async_trait;
use campaign_core::config::TransportConfig;
use campaign_core::PreparedEmail;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const ACCOUNT_TYPE: &str = "smtp";

/// Connection security for an SMTP relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpEncryption {
    /// Implicit TLS from the first byte.
    Ssl,
    /// Plain connection upgraded with STARTTLS.
    #[default]
    #[serde(alias = "tls")]
    Starttls,
    None,
}

impl SmtpEncryption {
    pub fn default_port(&self) -> u16 {
        match self {
            SmtpEncryption::Ssl => 465,
            SmtpEncryption::Starttls => 587,
            SmtpEncryption::None => 25,
        }
    }
}

/// `accountConfig` of an `smtp` account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpAccountConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub encryption: SmtpEncryption,
}

impl SmtpAccountConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.encryption.default_port())
    }
}

/// Relay connection settings resolved for one send.
#[derive(Debug, Clone)]
pub(crate) struct RelaySettings {
    pub host: String,
    pub port: u16,
    pub encryption: SmtpEncryption,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Sends through the SMTP relay named in the account config.
pub struct SmtpTransport {
    timeout: Duration,
}

impl SmtpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.smtp_timeout_secs),
        }
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn account_type(&self) -> &str {
        ACCOUNT_TYPE
    }

    async fn send(&self, email: &PreparedEmail) -> Result<(), TransportError> {
        let account: SmtpAccountConfig = parse_account_config(email)?;
        let message = build_message(email, &[])?;

        let settings = RelaySettings {
            port: account.port(),
            host: account.host,
            encryption: account.encryption,
            username: account.username,
            password: account.password,
            timeout: self.timeout,
        };

        deliver(&settings, message).await?;

        debug!(
            to = %email.recipient,
            host = %settings.host,
            port = settings.port,
            "SMTP message accepted"
        );
        Ok(())
    }
}

/// Assemble the MIME message for a prepared email.
///
/// `extra_headers` are appended after the email's own custom headers.
pub(crate) fn build_message(
    email: &PreparedEmail,
    extra_headers: &[(&str, String)],
) -> Result<Message, TransportError> {
    let from_addr: lettre::Address = email
        .from_email
        .parse()
        .map_err(|e| TransportError::Address(format!("from {}: {e}", email.from_email)))?;
    let to_addr: lettre::Address = email
        .recipient
        .parse()
        .map_err(|e| TransportError::Address(format!("to {}: {e}", email.recipient)))?;

    let mut builder = Message::builder()
        .from(Mailbox::new(email.from_name.clone(), from_addr))
        .to(Mailbox::new(None, to_addr))
        .subject(email.subject.clone());

    let custom = email
        .headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .chain(extra_headers.iter().cloned());
    for (name, value) in custom {
        if is_reserved_header(name) {
            continue;
        }
        let header_name = HeaderName::new_from_ascii(name.to_string())
            .map_err(|e| TransportError::Build(format!("header {name}: {e}")))?;
        builder = builder.raw_header(HeaderValue::new(header_name, value));
    }

    let built = match (&email.html_content, &email.text_content) {
        (Some(html), Some(text)) => builder.multipart(MultiPart::alternative_plain_html(
            text.clone(),
            html.clone(),
        )),
        (Some(html), None) => builder.singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html.clone()),
        ),
        (None, Some(text)) => builder.singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone()),
        ),
        (None, None) => {
            return Err(TransportError::Build(
                "email has neither HTML nor text content".into(),
            ))
        }
    };

    built.map_err(|e| TransportError::Build(e.to_string()))
}

/// Headers the builder sets itself; custom values for them are ignored.
fn is_reserved_header(name: &str) -> bool {
    ["from", "to", "subject"]
        .iter()
        .any(|reserved| name.eq_ignore_ascii_case(reserved))
}

/// Open a relay connection and hand the message over.
pub(crate) async fn deliver(
    settings: &RelaySettings,
    message: Message,
) -> Result<(), TransportError> {
    let smtp_err = |e: lettre::transport::smtp::Error| TransportError::Smtp(e.to_string());

    let mut builder = match settings.encryption {
        SmtpEncryption::Ssl => {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host).map_err(smtp_err)?
        }
        SmtpEncryption::Starttls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host).map_err(smtp_err)?
        }
        SmtpEncryption::None => {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        }
    }
    .port(settings.port)
    .timeout(Some(settings.timeout));

    if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    let mailer = builder.build();
    mailer.send(message).await.map_err(smtp_err)?;
    Ok(())
}
