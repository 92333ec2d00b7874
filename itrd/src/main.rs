//! Integration Test Runner - Daemon
//!
//! Listens for image-push webhooks, checks out the pushed branch and drives
//! one integration-test run per push on the cluster.

#![forbid(unsafe_code)]

mod cluster;
mod controller;
mod http_api;
mod logstore;
mod metrics;
mod registry;
mod sinks;
mod source;
mod webhook;

use anyhow::{Context, Result};
use clap::Parser;
use itr_common::{ItrConfig, LogFormat, MetricsSink, Notifier};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cluster::KubeClient;
use controller::RunController;
use logstore::LogStore;
use registry::RunRegistry;
use sinks::{InfluxSink, LogMetricsSink, LogNotifier, SlackNotifier};
use source::GitSource;
use webhook::Launcher;

const SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "itrd")]
#[command(author, version, about = "ITR daemon - webhook-triggered integration test runs")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "itr.toml", env = "ITR_CONFIG")]
    config: PathBuf,

    /// Address to listen on (overrides server.bind)
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check_config: bool,
}

fn init_logging(config: &ItrConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.general.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ItrConfig::load(&cli.config, false)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if cli.check_config {
        println!("Configuration OK: {}", cli.config.display());
        return Ok(());
    }

    init_logging(&config, cli.verbose);
    info!("Starting ITR daemon...");

    metrics::register_metrics().context("Failed to register metrics")?;

    let cluster = KubeClient::new(&config.cluster, config.job.clone())
        .context("Failed to create cluster client")?;
    info!("Cluster API at {}", config.cluster.api_url);

    let progress: Arc<dyn MetricsSink> = match &config.metrics.url {
        Some(url) => {
            let sink = InfluxSink::new(url, &config.metrics, SINK_TIMEOUT)
                .context("Failed to create metrics sink")?;
            info!("Writing progress to InfluxDB at {}", sink.write_url());
            Arc::new(sink)
        }
        None => {
            warn!("No metrics URL configured; progress is only logged");
            Arc::new(LogMetricsSink)
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notify.slack_url {
        Some(url) => Arc::new(
            SlackNotifier::new(url.clone(), SINK_TIMEOUT).context("Failed to create notifier")?,
        ),
        None => {
            warn!("No Slack URL configured; notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let logs = LogStore::new(&config.logs.dir, &config.server.public_url);
    info!("Job logs stored under {}", logs.root().display());

    let controller = RunController::new(
        Arc::new(cluster),
        progress,
        notifier,
        logs.clone(),
        config.run.clone(),
        config.notify.dashboard_url.clone(),
    );
    let launcher = Launcher::new(
        Arc::new(GitSource::new(config.source.clone())),
        controller,
        RunRegistry::new(config.server.run_history),
    );

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address {bind}"))?;

    let state = http_api::HttpState {
        launcher,
        logs,
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        pid: std::process::id(),
    };
    let server = http_api::start_server(addr, state)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tokio::select! {
        result = server => {
            result.context("HTTP server task failed")?.context("HTTP server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
    Ok(())
}
