//! Campaign Dispatcher: throttled bulk email delivery across many sending
//! accounts.
//!
//! Runs the dispatch HTTP API by default, or a single dispatch from a JSON
//! request file with `--dispatch-file`.

use anyhow::Context;
use campaign_api::{ApiServer, AppState};
use campaign_core::config::AppConfig;
use campaign_core::{DispatchRequest, InMemoryProgressStore};
use campaign_dispatch::Dispatcher;
use campaign_transport::TransportRegistry;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "campaign-dispatcher")]
#[command(about = "Throttled bulk email dispatch across many sending accounts")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__NODE_ID")]
    node_id: Option<String>,

    /// Bind address (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Run one dispatch from this JSON request file, print the summary and exit
    #[arg(long)]
    dispatch_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "campaign_dispatcher=info,campaign_dispatch=info,campaign_api=info,tower_http=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Dispatcher starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        default_rate_limit = config.dispatch.default_rate_limit,
        default_batch_size = config.dispatch.default_batch_size,
        "Configuration loaded"
    );

    let registry = Arc::new(TransportRegistry::with_defaults(&config.transport)?);
    let progress = Arc::new(InMemoryProgressStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        progress.clone(),
        config.dispatch.clone(),
    ));

    if let Some(path) = cli.dispatch_file {
        return run_file(&dispatcher, &path).await;
    }

    let state = AppState::new(dispatcher, progress, config.node_id.clone());
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campaign Dispatcher is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}

/// One-shot mode: dispatch the request stored at `path`.
async fn run_file(dispatcher: &Dispatcher, path: &Path) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let request: DispatchRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing dispatch request {}", path.display()))?;

    info!(
        campaign_id = %request.campaign_id,
        emails = request.prepared_emails.len(),
        "Dispatching from file"
    );

    let summary = dispatcher.dispatch(request).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
