//! Periodic copies of delivered emails sent to a monitoring inbox.

use campaign_core::{PreparedEmail, TestEmailSettings};
use std::sync::atomic::{AtomicU64, Ordering};

const SUBJECT_PREFIX: &str = "[AUTO-TEST] ";
const BANNER: &str = "--- THIS IS AN AUTOMATED TEST EMAIL ---";

/// Counts successful sends across every worker of a run and says when the
/// next monitoring copy is due.
#[derive(Debug)]
pub struct TestEmailTrigger {
    settings: TestEmailSettings,
    successes: AtomicU64,
}

impl TestEmailTrigger {
    /// `None` when `after_every` is zero.
    pub fn new(settings: TestEmailSettings) -> Option<Self> {
        (settings.after_every > 0).then(|| Self {
            settings,
            successes: AtomicU64::new(0),
        })
    }

    /// Count one successful send. True each time the count reaches a
    /// multiple of `after_every`.
    pub fn record_success(&self) -> bool {
        let successes = self.successes.fetch_add(1, Ordering::Relaxed) + 1;
        successes % self.settings.after_every == 0
    }

    pub fn recipient(&self) -> &str {
        &self.settings.recipient
    }

    /// Copy of `email` addressed to the monitoring inbox and marked as a
    /// test in its subject and bodies.
    pub fn test_copy(&self, email: &PreparedEmail) -> PreparedEmail {
        let mut copy = email.clone();
        copy.recipient = self.settings.recipient.clone();
        copy.subject = format!("{SUBJECT_PREFIX}{}", email.subject);
        copy.html_content = email
            .html_content
            .as_ref()
            .map(|html| format!("<p><strong>{BANNER}</strong></p><hr>{html}"));
        copy.text_content = email
            .text_content
            .as_ref()
            .map(|text| format!("{BANNER}\n\n{text}"));
        copy.headers.retain(|name, _| {
            !matches!(name.to_ascii_lowercase().as_str(), "to" | "cc" | "bcc")
        });
        copy
    }
}
