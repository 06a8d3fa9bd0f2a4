//! bundlegate - operator CLI for bundle rollout
//!
//! Drives the control plane's alias and gate API for one tenant:
//!
//! ```text
//! export BUNDLEGATE_TOKEN=...
//! bundlegate --tenant tenant_a candidate faq-0002
//! bundlegate --tenant tenant_a gate run faq-0002
//! bundlegate --tenant tenant_a promote
//! ```
//!
//! Responses are printed as pretty JSON on stdout. A non-2xx answer prints
//! the error body on stderr and exits with [`exit_codes::API_ERROR`].

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod client;
mod commands;

use client::{ClientError, ControlPlaneClient};
use commands::gate::GateCommand;
use commands::{alias, gate, parse_bundle_id, parse_tenant_id};

/// Process exit codes.
pub mod exit_codes {
    /// The control plane answered non-2xx.
    pub const API_ERROR: i32 = 1;
    /// The control plane could not be reached or answered garbage.
    pub const TRANSPORT_ERROR: i32 = 2;
}

/// bundlegate - bundle rollout operator CLI
#[derive(Parser, Debug)]
#[command(name = "bundlegate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Control-plane base URL
    #[arg(long, env = "BUNDLEGATE_URL", default_value = "http://127.0.0.1:8081")]
    url: String,

    /// Tenant to operate on
    #[arg(long, env = "BUNDLEGATE_TENANT", value_parser = parse_tenant_id)]
    tenant: String,

    /// Environment variable holding the operator bearer token
    #[arg(long, default_value = "BUNDLEGATE_TOKEN")]
    token_env: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Point the candidate alias at a bundle
    Candidate {
        /// Bundle id
        #[arg(value_parser = parse_bundle_id)]
        bundle_id: String,
    },

    /// Promote the gated candidate to current
    Promote,

    /// Point current at a previously gated bundle
    Rollback {
        /// Bundle id
        #[arg(value_parser = parse_bundle_id)]
        bundle_id: String,
    },

    /// Quality gate operations
    #[command(subcommand)]
    Gate(GateCommand),

    /// Show what runtimes currently resolve
    Resolve,

    /// Show the candidate and current aliases
    Aliases,
}

async fn run(client: &ControlPlaneClient, command: &Commands) -> Result<Value, ClientError> {
    match command {
        Commands::Candidate { bundle_id } => alias::candidate(client, bundle_id).await,
        Commands::Promote => alias::promote(client).await,
        Commands::Rollback { bundle_id } => alias::rollback(client, bundle_id).await,
        Commands::Gate(gate_command) => gate::run(client, gate_command).await,
        Commands::Resolve => alias::resolve(client).await,
        Commands::Aliases => alias::aliases(client).await,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let token = std::env::var(&cli.token_env)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .with_context(|| format!("operator token variable {} is unset or empty", cli.token_env))?;
    let client = ControlPlaneClient::new(&cli.url, cli.tenant.clone(), SecretString::from(token))
        .with_timeout(Duration::from_secs(cli.timeout_secs));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")?;

    match runtime.block_on(run(&client, &cli.command)) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        },
        Err(ClientError::Api { status, body }) => {
            eprintln!("error: control plane returned {status}");
            eprintln!("{body}");
            std::process::exit(exit_codes::API_ERROR);
        },
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(exit_codes::TRANSPORT_ERROR);
        },
    }
}
