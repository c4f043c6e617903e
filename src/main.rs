//! swarm-consensus - run a specialist swarm against one subject from the command line
//!
//! # Usage
//!
//! ```bash
//! # Analyze a lead record and print the decision as JSON
//! swarm-consensus analyze --input lead.json --subject lead-42
//!
//! # Keep learned trust across runs
//! swarm-consensus analyze --input lead.json --trust-db ./data/trust
//!
//! # Validate a config file
//! swarm-consensus check-config --config swarm_config.toml
//! ```
//!
//! # Environment Variables
//!
//! - `SWARM_CONFIG`: Path to the swarm config TOML (overridden by `--config`)
//! - `RUST_LOG`: Logging level (default: info)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swarm_consensus::agents::specialists::default_specialists;
use swarm_consensus::config::validation;
use swarm_consensus::{
    InMemoryTrustBackend, OrchestrationError, Orchestrator, SledTrustBackend, SwarmConfig,
    TrustBackend,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "swarm-consensus")]
#[command(about = "Multi-agent consensus engine for lead intelligence")]
#[command(version)]
struct CliArgs {
    /// Path to a swarm config TOML (default: $SWARM_CONFIG, then ./swarm_config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run every specialist against a subject payload and print the decision
    Analyze {
        /// JSON file holding the subject payload
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Subject id (default: the payload's "id" field, then the file stem)
        #[arg(long)]
        subject: Option<String>,

        /// Sled database for durable trust records (default: in memory)
        #[arg(long, value_name = "PATH", env = "SWARM_TRUST_DB")]
        trust_db: Option<PathBuf>,
    },

    /// Validate a config file and report warnings
    CheckConfig,
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<SwarmConfig> {
    match path {
        Some(p) => SwarmConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => Ok(SwarmConfig::load()),
    }
}

fn subject_from(payload: &serde_json::Value, input: &Path) -> String {
    payload
        .get("id")
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .or_else(|| input.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "subject".to_string())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_analyze(
    config: &SwarmConfig,
    input: &Path,
    subject: Option<String>,
    trust_db: Option<&Path>,
) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", input.display()))?;
    let subject_id = subject.unwrap_or_else(|| subject_from(&payload, input));

    let backend: Arc<dyn TrustBackend> = match trust_db {
        Some(path) => Arc::new(
            SledTrustBackend::open(path)
                .with_context(|| format!("Failed to open trust store at {}", path.display()))?,
        ),
        None => Arc::new(InMemoryTrustBackend::new()),
    };

    let orchestrator = Orchestrator::new(config, default_specialists(), backend)
        .context("Failed to assemble swarm")?;

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Received Ctrl+C, cancelling outstanding specialists");
        ctrl_c.cancel();
    });

    match orchestrator
        .analyze_with_cancel(&subject_id, payload, &shutdown)
        .await
    {
        Ok(decision) => {
            println!("{}", serde_json::to_string_pretty(decision.as_ref())?);
        }
        Err(OrchestrationError::InsufficientInput { subject_id }) => {
            // Subject-level fallback: nothing to reduce, hand it to a person
            let review = json!({
                "subject_id": subject_id,
                "status": "needs_human_review",
                "reason": "no specialist produced a usable recommendation",
            });
            println!("{}", serde_json::to_string_pretty(&review)?);
        }
        Err(e) => return Err(e).context("Analysis failed"),
    }

    Ok(())
}

fn run_check_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;

    let warnings = validation::operational_warnings(&config);
    for w in &warnings {
        warn!(field = %w.field, "{}", w);
    }

    info!(
        swarm = %config.swarm.name,
        warnings = warnings.len(),
        "Config is valid"
    );
    println!("{}", config.to_toml()?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.json_logs);

    match args.command {
        SubCommand::Analyze {
            input,
            subject,
            trust_db,
        } => {
            let config = load_config(args.config.as_deref())?;
            run_analyze(&config, &input, subject, trust_db.as_deref()).await
        }
        SubCommand::CheckConfig => run_check_config(args.config.as_deref()),
    }
}
