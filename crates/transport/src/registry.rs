//! Transport lookup keyed by account type.

use crate::{AppsScriptTransport, PowerMtaTransport, SmtpTransport, Transport};
use campaign_core::config::TransportConfig;
use campaign_core::{CampaignError, CampaignResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Maps `accountType` strings to transports. Adding an account type means
/// registering one more implementation.
#[derive(Default, Clone)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the SMTP, Apps Script and PowerMTA transports.
    pub fn with_defaults(config: &TransportConfig) -> CampaignResult<Self> {
        let apps_script = AppsScriptTransport::new(config)
            .map_err(|e| CampaignError::Config(format!("apps-script client: {e}")))?;

        let registry = Self::new()
            .with(Arc::new(SmtpTransport::new(config)))
            .with(Arc::new(apps_script))
            .with(Arc::new(PowerMtaTransport::new(config)));

        info!(account_types = ?registry.account_types(), "Transport registry initialized");
        Ok(registry)
    }

    /// Register a transport, replacing any previous one for the same type.
    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        self.transports
            .insert(transport.account_type().to_string(), transport);
    }

    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    pub fn get(&self, account_type: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(account_type).cloned()
    }

    pub fn account_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.transports.keys().cloned().collect();
        types.sort();
        types
    }
}
