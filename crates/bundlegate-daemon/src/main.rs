//! bundlegate-daemon - control-plane and runtime HTTP services
//!
//! One binary, two services:
//!
//! ```text
//! bundlegate-daemon -c bundlegate.toml control-plane
//! bundlegate-daemon -c bundlegate.toml runtime --listen 0.0.0.0:8080
//! ```
//!
//! The Tokio runtime is built in a synchronous `main` after argument
//! parsing; all initialization that can fail happens before the listener is
//! bound.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::Router;
use bundlegate_core::config::BundlegateConfig;
use bundlegate_daemon::control_plane::{self, ControlPlaneState};
use bundlegate_daemon::runtime_service::{self, RuntimeState};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// bundlegate daemon - bundle rollout services
#[derive(Parser, Debug)]
#[command(name = "bundlegate-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "bundlegate.toml", env = "BUNDLEGATE_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    service: Service,
}

#[derive(Subcommand, Debug)]
enum Service {
    /// Alias lifecycle, quality gates and resolution
    ControlPlane {
        /// Override `control_plane.listen`
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Tenant-facing `/execute`
    Runtime {
        /// Override `runtime.listen`
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    runtime.block_on(async_main(args))
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<BundlegateConfig> {
    if path.exists() {
        let config = BundlegateConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(BundlegateConfig::default())
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(&args)?;
    let config = load_config(&args.config)?;
    let audit = bundlegate_daemon::audit_sink_from_config(&config.audit)
        .context("failed to open audit sink")?;

    let (name, listen, app): (&str, SocketAddr, Router) = match args.service {
        Service::ControlPlane { listen } => {
            let state = ControlPlaneState::from_config(&config.control_plane, audit)
                .context("failed to initialize control plane")?;
            (
                control_plane::SERVICE,
                listen.unwrap_or(config.control_plane.listen),
                control_plane::router(state),
            )
        },
        Service::Runtime { listen } => {
            let state = RuntimeState::from_config(&config, audit)
                .context("failed to initialize runtime")?;
            (
                runtime_service::SERVICE,
                listen.unwrap_or(config.runtime.listen),
                runtime_service::router(state),
            )
        },
    };

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    info!(
        service = name,
        addr = %listener.local_addr().context("listener has no local address")?,
        version = env!("CARGO_PKG_VERSION"),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;
    info!(service = name, "shut down");
    Ok(())
}

async fn shutdown_signal() {
    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        tracing::error!("failed to register signal handlers, falling back to ctrl-c");
        let _ = tokio::signal::ctrl_c().await;
        return;
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }
}
