use std::path::PathBuf;

use clap::{Parser, Subcommand};
use prioria_core::{MedicalRecordType, ProfileKind};

/// Prioria - a priority-ordered permissioned ledger
#[derive(Parser)]
#[command(name = "prioria")]
#[command(about = "Prioria node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a validator node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Generate configurations for a local validator network
    Init {
        /// Directory receiving node-<i>.json files
        #[arg(short, long, default_value = "prioria-net")]
        output: PathBuf,

        /// Number of validators
        #[arg(short = 'n', long, default_value_t = 4)]
        validators: usize,

        /// Deployment profile (general or healthcare)
        #[arg(short, long, default_value = "general", value_parser = parse_profile)]
        profile: ProfileKind,

        /// RPC port of node-0; later nodes count up from here
        #[arg(long, default_value_t = 8080)]
        base_port: u16,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show node status
    Status {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,
    },

    /// Submit a signed entry
    Submit {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:8080")]
        endpoint: String,

        /// Entry JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Build signed entries for testing
    Entry {
        #[command(subcommand)]
        command: EntryCommands,
    },

    /// Run an in-process validator cluster and print its stats
    Cluster {
        /// Deployment profile (general or healthcare)
        #[arg(short, long, default_value = "general", value_parser = parse_profile)]
        profile: ProfileKind,

        /// Validators per tier, most trusted first
        #[arg(short, long, value_delimiter = ',', default_value = "2,3,2")]
        tiers: Vec<usize>,

        /// Consensus round time in milliseconds
        #[arg(long, default_value_t = 1000)]
        round_ms: u64,

        /// Seconds between stats reports
        #[arg(long, default_value_t = 5)]
        report_secs: u64,

        /// Synthetic entries submitted per second
        #[arg(long, default_value_t = 5)]
        load: u32,

        /// Stop after this many seconds; runs until interrupted when absent
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
pub enum EntryCommands {
    /// A generic entry; priority signals come from payload fields
    Generic {
        /// Sender secret key hex
        #[arg(long)]
        secret: String,
        /// Recipient label
        #[arg(long)]
        recipient: String,
        #[arg(long, default_value_t = 0)]
        amount: u64,
        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Entry nonce
        #[arg(long)]
        nonce: u64,
        /// Output file (JSON)
        #[arg(short, long)]
        out: PathBuf,
    },

    /// A healthcare record; priority signals come from the record type
    Medical {
        /// Provider secret key hex
        #[arg(long)]
        secret: String,
        /// Record type, e.g. EMERGENCY_VISIT or LAB_RESULT
        #[arg(long, value_parser = parse_record_type)]
        record_type: MedicalRecordType,
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        provider_id: String,
        #[arg(long)]
        facility_id: String,
        /// Clinical data as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,
        /// Entry nonce
        #[arg(long)]
        nonce: u64,
        /// Output file (JSON)
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn parse_profile(input: &str) -> Result<ProfileKind, String> {
    match input.trim().to_lowercase().as_str() {
        "general" => Ok(ProfileKind::General),
        "healthcare" => Ok(ProfileKind::Healthcare),
        other => Err(format!("Unknown profile '{}'", other)),
    }
}

fn parse_record_type(input: &str) -> Result<MedicalRecordType, String> {
    let wanted = input.trim().to_uppercase().replace('-', "_");
    MedicalRecordType::ALL
        .into_iter()
        .find(|t| t.as_str() == wanted)
        .ok_or_else(|| format!("Unknown record type '{}'", input))
}
