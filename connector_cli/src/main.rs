use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use connector_core::extension::SAMPLE_ASSET_ID;
use connector_core::policy::Action;
use connector_core::{
    bootstrap, AtlasPropertyLookup, ConnectorConfig, ConnectorRuntime, DataAddress,
    DataEntryPropertyLookup, FileTransferExtension, InMemoryAtlasApi, ParticipantAgent,
    TransferOutcome,
};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit code for a policy denial.
const EXIT_DENIED: i32 = 2;

/// Exit code for a system fault.
const EXIT_FAULT: i32 = 1;

#[derive(Debug, Parser)]
#[command(name = "connector", version = "0.0.1-stage1-phase2")]
struct Cli {
    /// Path to a Connector.toml; defaults to the nearest one above the
    /// current directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Evaluate the policies governing an asset for a set of claims
    Evaluate {
        #[arg(long, default_value = SAMPLE_ASSET_ID)]
        asset: String,
        /// Requester claim as key=value; repeatable
        #[arg(long = "claim", value_parser = parse_claim)]
        claims: Vec<(String, Value)>,
        /// Report the verdict for this action only
        #[arg(long)]
        action: Option<String>,
    },
    /// Transfer an asset into a local file if the policy allows it
    Transfer {
        #[arg(long, default_value = SAMPLE_ASSET_ID)]
        asset: String,
        /// Destination file path
        #[arg(long)]
        dest: PathBuf,
        #[arg(long = "claim", value_parser = parse_claim)]
        claims: Vec<(String, Value)>,
    },
    /// List registered assets and their addresses
    Assets,
    /// Look up catalog metadata for an entity
    Lookup {
        #[arg(long)]
        entity: String,
    },
}

/// Parse `key=value`. The value is read as JSON when it parses, otherwise
/// as a plain string.
fn parse_claim(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty claim name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn agent(claims: Vec<(String, Value)>) -> ParticipantAgent {
    let claims: HashMap<String, Value> = claims.into_iter().collect();
    ParticipantAgent::new(None, claims)
}

fn print_json<T: serde::Serialize>(value: &T) -> connector_core::Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    println!("{}", rendered);
    Ok(())
}

async fn run(runtime: &ConnectorRuntime, command: Commands) -> connector_core::Result<i32> {
    match command {
        Commands::Evaluate {
            asset,
            claims,
            action,
        } => {
            let decision = runtime.evaluate_asset(&asset, agent(claims))?;
            print_json(&decision)?;
            let allowed = match action {
                Some(action) => decision.permits(&Action::new(action)),
                None => decision.allowed(),
            };
            Ok(if allowed { 0 } else { EXIT_DENIED })
        }
        Commands::Transfer {
            asset,
            dest,
            claims,
        } => {
            let sink = DataAddress::from_file_path(dest)?;
            match runtime.transfer(&asset, sink, agent(claims)).await? {
                TransferOutcome::Completed(summary) => {
                    info!(request_id = %summary.request_id, "Transfer completed");
                    print_json(&summary)?;
                    Ok(0)
                }
                TransferOutcome::Denied(decision) => {
                    eprintln!("Denied: {}", decision);
                    Ok(EXIT_DENIED)
                }
            }
        }
        Commands::Assets => {
            let assets = runtime.asset_index().list();
            if assets.is_empty() {
                println!("No assets registered.");
            }
            for (asset, address) in assets {
                println!("{}\t{}", asset.id(), address);
            }
            Ok(0)
        }
        Commands::Lookup { entity } => {
            let lookup = AtlasPropertyLookup::new(InMemoryAtlasApi::from_assets(runtime.asset_index()));
            let properties = lookup.properties_for_entity(&entity);
            print_json(&properties)?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConnectorConfig::load(path),
        None => ConnectorConfig::from_project_root(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_FAULT);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = match bootstrap(config, &[&FileTransferExtension]) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Bootstrap failed");
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_FAULT);
        }
    };

    let code = match run(&runtime, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "Command failed");
            eprintln!("Error: {}", e);
            EXIT_FAULT
        }
    };
    std::process::exit(code);
}
