//! memtank node
//!
//! Hosts the hot-tier metric registry, feeds it from a carbon plaintext
//! listener and exposes operator counters over HTTP. Closed chunks are
//! discarded; this node keeps data in memory only.

mod carbon;
mod http;

use anyhow::{Context, Result};
use carbon::CarbonStats;
use clap::Parser;
use memtank_common::Config;
use memtank_mdata::{AggMetrics, DevNullStore, NoopCachePusher};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "memtank")]
#[command(about = "memtank hot-tier metric node")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML)
    #[arg(short, long, env = "MEMTANK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the carbon listen address
    #[arg(long)]
    carbon_listen: Option<SocketAddr>,

    /// Override the HTTP (`/metrics`) listen address
    #[arg(long)]
    http_listen: Option<SocketAddr>,

    /// Interval between stats log lines
    #[arg(long, default_value = "60s", value_parser = humantime_duration)]
    stats_interval: Duration,
}

fn humantime_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Load configuration from an optional file plus `MEMTANK__*` environment
/// overrides, then validate it.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let config: Config = builder
        .add_source(config::Environment::with_prefix("MEMTANK").separator("__"))
        .build()
        .context("failed to read configuration")?
        .try_deserialize()
        .context("failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting memtank");

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.carbon_listen {
        config.carbon.listen_addr = addr;
    }
    if let Some(addr) = args.http_listen {
        config.http.listen_addr = addr;
    }
    info!(
        chunk_span = ?config.registry.chunk_span,
        num_chunks = config.registry.num_chunks,
        gc_interval = ?config.registry.gc_interval,
        "registry settings"
    );

    let registry = Arc::new(AggMetrics::new(
        Arc::new(DevNullStore::new()),
        Arc::new(NoopCachePusher),
        &config.registry,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let carbon_stats = Arc::new(CarbonStats::default());

    let carbon_task = if config.carbon.enabled {
        let listener = TcpListener::bind(config.carbon.listen_addr)
            .await
            .with_context(|| format!("failed to bind carbon listener on {}", config.carbon.listen_addr))?;
        Some(tokio::spawn(carbon::serve(
            listener,
            Arc::clone(&registry),
            Arc::clone(&carbon_stats),
            shutdown_rx.clone(),
        )))
    } else {
        warn!("carbon input disabled, nothing will be ingested");
        None
    };

    let http_task = if config.http.enabled {
        let listener = TcpListener::bind(config.http.listen_addr)
            .await
            .with_context(|| format!("failed to bind http listener on {}", config.http.listen_addr))?;
        Some(tokio::spawn(http::serve(
            listener,
            http::HttpState {
                registry: Arc::clone(&registry),
                carbon: Arc::clone(&carbon_stats),
            },
            shutdown_rx.clone(),
        )))
    } else {
        None
    };

    let stats_task = tokio::spawn(log_stats(
        Arc::clone(&registry),
        Arc::clone(&carbon_stats),
        args.stats_interval,
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
    shutdown_tx.send(true).ok();

    if let Some(task) = carbon_task {
        task.await.ok();
    }
    if let Some(task) = http_task {
        match task.await {
            Ok(Err(e)) => warn!(error = %e, "http server exited with an error"),
            Ok(Ok(())) | Err(_) => {}
        }
    }
    stats_task.await.ok();

    // joining the sweeper thread blocks
    let sweeper_registry = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || sweeper_registry.shutdown())
        .await
        .context("sweeper shutdown task failed")?;

    let s = registry.stats().snapshot();
    info!(
        metrics_active = s.metrics_active,
        metrics_created = s.metrics_created,
        metrics_evicted = s.metrics_evicted,
        "memtank shut down gracefully"
    );

    Ok(())
}

async fn log_stats(
    registry: Arc<AggMetrics>,
    carbon: Arc<CarbonStats>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let s = registry.stats().snapshot();
                info!(
                    metrics_active = s.metrics_active,
                    points_dropped = s.points_dropped,
                    chunks_persisted = s.chunks_persisted,
                    sweeps = s.sweeps,
                    carbon_lines = carbon.lines.load(Ordering::Relaxed),
                    carbon_invalid = carbon.invalid.load(Ordering::Relaxed),
                    carbon_dropped = carbon.dropped.load(Ordering::Relaxed),
                    "stats"
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
