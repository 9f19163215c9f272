//! Prepared emails and per-email send outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a sending account, derived as `"{account_type}-{account_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(String);

impl AccountKey {
    pub fn new(account_type: &str, account_id: &str) -> Self {
        Self(format!("{account_type}-{account_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fully composed email, bound to the account that will send it.
///
/// `account_type` stays an open string: an unknown type must reach the
/// worker and fail that email alone instead of rejecting the whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedEmail {
    pub account_type: String,
    pub account_id: String,
    #[serde(default)]
    pub account_config: serde_json::Value,
    pub recipient: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
    pub subject: String,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
    /// Extra headers attached to the outgoing message.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl PreparedEmail {
    pub fn account_key(&self) -> AccountKey {
        AccountKey::new(&self.account_type, &self.account_id)
    }
}

/// Outcome of a single send attempt. Produced exactly once per email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    /// Recipient address.
    pub email: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub account_type: String,
    pub account_key: AccountKey,
}

impl SendResult {
    pub fn sent(email: &PreparedEmail) -> Self {
        Self {
            email: email.recipient.clone(),
            success: true,
            error: None,
            account_type: email.account_type.clone(),
            account_key: email.account_key(),
        }
    }

    pub fn failed(email: &PreparedEmail, error: impl Into<String>) -> Self {
        Self {
            email: email.recipient.clone(),
            success: false,
            error: Some(error.into()),
            account_type: email.account_type.clone(),
            account_key: email.account_key(),
        }
    }
}
