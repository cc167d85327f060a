//! Command-line access to a BC-10 analyzer
//!
//! ```bash
//! # Fetch a CBC result through the local relay
//! bc10-query --host 192.168.1.50 fetch CBC001
//!
//! # Fetch and write back to an HMIS lab request
//! bc10-query --host 192.168.1.50 --store-url http://hmis.local/api fetch CBC001 --lab-request 17
//!
//! # Simulated panel, no analyzer involved
//! bc10-query mock CBC001
//!
//! # Connectivity check with debug logs
//! RUST_LOG=bc10_analyzer=debug bc10-query --host 192.168.1.50 status
//! ```
//!
//! Relay address and deadlines come from `BC10_RELAY_ADDR`,
//! `BC10_RELAY_TIMEOUT_MS` and `BC10_HTTP_TIMEOUT_MS`.

use bc10_analyzer::integration::{
    AnalyzerIntegration, HttpLabRequestStore, InMemoryLabRequestStore, LabRequestId,
    LabRequestRecord, LabRequestStore,
};
use bc10_analyzer::io::config::DEFAULT_ANALYZER_PORT;
use bc10_analyzer::io::{AnalyzerEndpoint, TransportConfig, TransportMode};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bc10-query")]
#[command(about = "Query a Mindray BC-10 analyzer for CBC results")]
struct Cli {
    /// Analyzer host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Analyzer port
    #[arg(long, default_value_t = DEFAULT_ANALYZER_PORT)]
    port: u16,
    /// How to reach the analyzer
    #[arg(long, value_enum, default_value_t = Mode::Relay)]
    mode: Mode,
    /// HMIS API base URL for lab-request write-back
    #[arg(long)]
    store_url: Option<String>,
    /// Bearer token for the HMIS API
    #[arg(long, env = "BC10_STORE_TOKEN", hide_env_values = true)]
    store_token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the CBC result for a sample from the analyzer
    Fetch {
        /// Sample identifier
        sample_id: String,
        /// Lab request to write the result to
        #[arg(long)]
        lab_request: Option<String>,
    },
    /// Generate a simulated CBC result
    Mock {
        /// Sample identifier
        sample_id: String,
        /// Lab request to write the result to
        #[arg(long)]
        lab_request: Option<String>,
    },
    /// Check analyzer connectivity
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Local relay socket, then HTTP
    Relay,
    /// Analyzer socket, then HTTP
    Direct,
    /// HTTP only
    Http,
}

impl From<Mode> for TransportMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Relay => TransportMode::RelaySocket,
            Mode::Direct => TransportMode::DirectSocket,
            Mode::Http => TransportMode::HttpPoll,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "bc10-query failed");
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = AnalyzerEndpoint::new(cli.host, cli.port, cli.mode.into())?;
    let config = TransportConfig::from_env()?;

    let store: Arc<dyn LabRequestStore> = match &cli.store_url {
        Some(url) => {
            let mut store = HttpLabRequestStore::new(url)?;
            if let Some(token) = cli.store_token {
                store = store.with_bearer_token(token);
            }
            Arc::new(store)
        }
        None => {
            // Without an HMIS, write-back lands in a throwaway record so the
            // persistence outcome can still be shown
            let store = InMemoryLabRequestStore::new();
            if let Commands::Fetch { lab_request: Some(id), .. }
            | Commands::Mock { lab_request: Some(id), .. } = &cli.command
            {
                store.insert(LabRequestRecord::pending(id.as_str())).await;
            }
            Arc::new(store)
        }
    };

    let integration = AnalyzerIntegration::connect_to(endpoint, config, store)?;

    match cli.command {
        Commands::Fetch { sample_id, lab_request } => {
            let lab_request = lab_request.map(LabRequestId::from);
            let outcome = integration.request_cbc_result(&sample_id, lab_request.as_ref()).await;
            integration.disconnect().await;
            match outcome? {
                Some(outcome) => print_json(&outcome)?,
                None => {
                    eprintln!("No CBC result for sample {}", sample_id);
                    print_json(&serde_json::Value::Null)?;
                }
            }
        }
        Commands::Mock { sample_id, lab_request } => {
            let lab_request = lab_request.map(LabRequestId::from);
            let outcome = integration.mock_request_result(&sample_id, lab_request.as_ref()).await?;
            print_json(&outcome)?;
        }
        Commands::Status => {
            let status = integration.initialize().await;
            integration.disconnect().await;
            print_json(&status)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
