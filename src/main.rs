//! `chordd`: hosts one or more vnodes and answers key lookups over HTTP.

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use chord_ring::{Ring, VNodeConfig};

mod api;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Start a new ring.
    Create,
    /// Join the ring reachable at --rhost.
    Join,
}

#[derive(Debug, Parser)]
#[command(name = "chordd", about = "Chord ring node")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Create)]
    mode: Mode,

    /// Number of vnodes to host.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Listen address of the first vnode. Use port 0 for ephemeral ports.
    #[arg(long, default_value = "127.0.0.1:8000")]
    host: String,

    /// Any vnode of the ring to join.
    #[arg(long)]
    rhost: Option<String>,

    /// Address of the HTTP lookup API.
    #[arg(long, default_value = "127.0.0.1:8090")]
    api: String,

    /// JSON file with vnode tuning values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "CHORD_LOG", default_value = "info")]
    log_level: String,
}

/// Respects `RUST_LOG` if set, otherwise uses the given level.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    let config = match &cli.config {
        Some(path) => VNodeConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => VNodeConfig::default(),
    };
    info!(
        workers = cli.workers,
        host = %cli.host,
        min_stabilize_ms = config.min_stabilize_interval,
        max_stabilize_ms = config.max_stabilize_interval,
        fix_finger_ms = config.fix_finger_interval,
        check_predecessor_ms = config.check_predecessor_interval,
        max_fingers = config.max_fingers,
        "vnode configuration"
    );

    let ring = match (cli.mode, &cli.rhost) {
        (Mode::Create, _) => Ring::create(cli.workers, &cli.host, config)
            .await
            .context("failed to create ring")?,
        (Mode::Join, Some(rhost)) => Ring::join(cli.workers, &cli.host, rhost, config)
            .await
            .with_context(|| format!("failed to join ring at {rhost}"))?,
        (Mode::Join, None) => bail!("--rhost is required in join mode"),
    };
    let ring = Arc::new(ring);

    let listener = tokio::net::TcpListener::bind(&cli.api)
        .await
        .with_context(|| format!("failed to bind API address {}", cli.api))?;
    info!(addr = %listener.local_addr()?, "lookup API listening");

    axum::serve(listener, api::router(ring.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("lookup API failed")?;

    ring.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
