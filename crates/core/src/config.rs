use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `CAMPAIGN_DISPATCH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Knobs for the campaign dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Emails per hour used when a request omits `rateLimit`.
    #[serde(default = "default_rate_limit")]
    pub default_rate_limit: u32,
    /// Batch size used when a request omits `batchSize`.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_emails_per_request")]
    pub max_emails_per_request: usize,
    /// Floor for the computed inter-send delay.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Start offset between consecutive account workers.
    #[serde(default = "default_worker_stagger_ms")]
    pub worker_stagger_ms: u64,
    /// Completed batches between two incremental progress writes.
    #[serde(default = "default_progress_every_batches")]
    pub progress_every_batches: u32,
    /// Upper bound for one progress write; a slower store counts as a
    /// failed write.
    #[serde(default = "default_progress_write_timeout_ms")]
    pub progress_write_timeout_ms: u64,
    /// Number of results echoed back in the summary.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_smtp_timeout_secs")]
    pub smtp_timeout_secs: u64,
    #[serde(default = "default_apps_script_timeout_secs")]
    pub apps_script_timeout_secs: u64,
    /// Max characters of a remote error body kept in a failure message.
    #[serde(default = "default_error_body_limit")]
    pub error_body_limit: usize,
}

// Default functions
fn default_node_id() -> String {
    "dispatch-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_rate_limit() -> u32 {
    3600
}
fn default_batch_size() -> usize {
    10
}
fn default_max_batch_size() -> usize {
    500
}
fn default_max_emails_per_request() -> usize {
    100_000
}
fn default_min_delay_ms() -> u64 {
    100
}
fn default_worker_stagger_ms() -> u64 {
    200
}
fn default_progress_every_batches() -> u32 {
    5
}
fn default_progress_write_timeout_ms() -> u64 {
    5000
}
fn default_sample_size() -> usize {
    5
}
fn default_smtp_timeout_secs() -> u64 {
    25
}
fn default_apps_script_timeout_secs() -> u64 {
    30
}
fn default_error_body_limit() -> usize {
    500
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: default_rate_limit(),
            default_batch_size: default_batch_size(),
            max_batch_size: default_max_batch_size(),
            max_emails_per_request: default_max_emails_per_request(),
            min_delay_ms: default_min_delay_ms(),
            worker_stagger_ms: default_worker_stagger_ms(),
            progress_every_batches: default_progress_every_batches(),
            progress_write_timeout_ms: default_progress_write_timeout_ms(),
            sample_size: default_sample_size(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            smtp_timeout_secs: default_smtp_timeout_secs(),
            apps_script_timeout_secs: default_apps_script_timeout_secs(),
            error_body_limit: default_error_body_limit(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            dispatch: DispatchConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CAMPAIGN_DISPATCH")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
