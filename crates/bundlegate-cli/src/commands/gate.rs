//! `gate` subcommands.

use clap::Subcommand;
use serde_json::{Value, json};

use super::parse_bundle_id;
use crate::client::{ClientError, ControlPlaneClient};

/// Quality gate operations.
#[derive(Subcommand, Debug)]
pub enum GateCommand {
    /// Run the bundle's golden suites
    Run {
        /// Bundle to evaluate
        #[arg(value_parser = parse_bundle_id)]
        bundle_id: String,

        /// Run only this suite
        #[arg(long)]
        suite: Option<String>,
    },
    /// Show one gate run
    Show {
        /// Bundle the run belongs to
        #[arg(value_parser = parse_bundle_id)]
        bundle_id: String,

        /// Gate run id
        gate_id: String,
    },
    /// List recent gate runs, newest first
    History {
        /// Bundle to list
        #[arg(value_parser = parse_bundle_id)]
        bundle_id: String,
    },
}

/// Execute a gate subcommand.
pub async fn run(client: &ControlPlaneClient, command: &GateCommand) -> Result<Value, ClientError> {
    match command {
        GateCommand::Run { bundle_id, suite } => {
            let body = suite.as_ref().map(|suite_id| json!({ "suite_id": suite_id }));
            client
                .post(&format!("/bundles/{bundle_id}/gates"), body.as_ref())
                .await
        },
        GateCommand::Show { bundle_id, gate_id } => {
            client
                .get(&format!("/bundles/{bundle_id}/gates/{gate_id}"))
                .await
        },
        GateCommand::History { bundle_id } => {
            client
                .get(&format!("/bundles/{bundle_id}/gates/history"))
                .await
        },
    }
}
