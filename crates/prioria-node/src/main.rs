use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use prioria_consensus::EngineConfig;
use prioria_core::{LedgerEntry, ProfileKind};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod cluster;
mod config;
mod entrygen;
mod node;

use cli::{Cli, Commands};
use cluster::Cluster;
use config::{generate_sample_configs, NodeConfig};
use node::Node;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_node(config).await?;
        }
        Commands::Init {
            output,
            validators,
            profile,
            base_port,
        } => {
            init_network(&output, validators, profile, base_port)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
        Commands::Status { endpoint } => {
            show_status(&endpoint).await?;
        }
        Commands::Submit { endpoint, file } => {
            submit_entry(&endpoint, &file).await?;
        }
        Commands::Entry { command } => {
            entrygen::handle_entry(command)?;
        }
        Commands::Cluster {
            profile,
            tiers,
            round_ms,
            report_secs,
            load,
            duration_secs,
        } => {
            run_cluster(profile, &tiers, round_ms, report_secs, load, duration_secs).await?;
        }
    }

    Ok(())
}

/// Run a validator node
async fn run_node(config_path: PathBuf) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    if !config_path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'prioria init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }

    let config = NodeConfig::load(&config_path)?;
    let node = Node::new(config)?;
    node.run().await
}

/// Write one configuration per validator of a local network
fn init_network(output: &Path, validators: usize, profile: ProfileKind, base_port: u16) -> Result<()> {
    if validators == 0 {
        anyhow::bail!("A network needs at least one validator");
    }
    info!("Generating {} validator configurations", validators);

    std::fs::create_dir_all(output)?;
    let configs = generate_sample_configs(validators, profile, base_port);
    for config in &configs {
        let path = output.join(format!("{}.json", config.node_id));
        config.save(&path)?;
        println!("  {} -> {} (rpc {})", config.node_id, path.display(), config.rpc_addr);
    }

    println!("\nConfigurations written to {}", output.display());
    println!("Each file holds only its own validator's secret key.");
    println!("\nTo start a node, run:");
    println!("  prioria run --config {}", output.join("node-0.json").display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = prioria_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}

/// Show node status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/status", endpoint);

    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: serde_json::Value = response.json().await?;
        println!("Node Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}

/// Submit a signed entry
async fn submit_entry(endpoint: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)?;
    let entry: LedgerEntry = serde_json::from_str(&content)?;

    let url = format!("{}/entry", endpoint);

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .json(&serde_json::json!({ "entry": entry }))
        .send()
        .await?;

    let success = response.status().is_success();
    let body: serde_json::Value = response.json().await?;
    if success {
        println!("Entry submitted:");
    } else {
        error!("Failed to submit entry:");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);

    Ok(())
}

/// Run an in-process cluster under synthetic load, reporting periodically
async fn run_cluster(
    profile: ProfileKind,
    tiers: &[usize],
    round_ms: u64,
    report_secs: u64,
    load: u32,
    duration_secs: Option<u64>,
) -> Result<()> {
    let mut cluster = Cluster::new(profile, tiers, EngineConfig::default())?;
    cluster.start(Duration::from_millis(round_ms.max(1)));

    let mut report = tokio::time::interval(Duration::from_secs(report_secs.max(1)));
    let mut submit = tokio::time::interval(Duration::from_secs(1) / load.max(1));
    let stop = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Cannot listen for interrupts: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = report.tick() => cluster.report().await,
            _ = submit.tick(), if load > 0 => {
                let entry = cluster.synthetic_entry()?;
                if let Err(e) = cluster.submit(entry).await {
                    warn!("Synthetic entry rejected: {}", e);
                }
            }
        }
    }

    println!("\nFinal state of {} validators:", cluster.engines().len());
    cluster.report().await;
    cluster.shutdown();
    Ok(())
}
