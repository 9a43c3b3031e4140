//! JADE Capability Mediation: Demo CLI
//!
//! Runs one or all of the pipeline scenarios. Each scenario uses the real
//! components (policy store, mediator, interceptor) wired together over an
//! in-memory storage backend and an in-memory page runtime.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- default-deny
//!   cargo run -p demo -- --config jade.toml timeout

mod pipeline;
mod scenarios;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jade_contracts::{config::JadeConfig, error::JadeResult};

use crate::pipeline::Pipeline;

// ── CLI definition ────────────────────────────────────────────────────────────

/// JADE: per-origin capability mediation demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "JADE capability mediation pipeline demo",
    long_about = "Runs JADE scenarios showing interception, policy decisions,\n\
                  fail-closed timeouts, and the audit trail with risk scores."
)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scenario in sequence against one store.
    RunAll,
    /// example.com with no stored policy: fetch is blocked.
    DefaultDeny,
    /// localhost preset: storage allowed, network blocked.
    Preset,
    /// Saving a policy pushes it to the bound mediator.
    SaveThenAllow,
    /// An API outside the capability map is always blocked.
    UnknownApi,
    /// Whitelisting grants every capability.
    Whitelist,
    /// A mediator that never answers: the request fails closed.
    Timeout,
    /// List stored policies with their computed risk scores.
    Policies,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    match run(cli).await {
        Ok(()) => {
            println!("All selected scenarios completed successfully.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> JadeResult<()> {
    let config = match &cli.config {
        Some(path) => JadeConfig::from_file(path)?,
        None => JadeConfig::default(),
    };
    let pipeline = Pipeline::start(config).await?;

    match cli.command {
        Command::RunAll => {
            scenarios::default_deny(&pipeline).await?;
            scenarios::preset(&pipeline).await?;
            scenarios::save_then_allow(&pipeline).await?;
            scenarios::unknown_api(&pipeline).await?;
            scenarios::whitelist(&pipeline).await?;
            scenarios::timeout(&pipeline).await?;
            scenarios::policies(&pipeline).await?;
        }
        Command::DefaultDeny => scenarios::default_deny(&pipeline).await?,
        Command::Preset => scenarios::preset(&pipeline).await?,
        Command::SaveThenAllow => scenarios::save_then_allow(&pipeline).await?,
        Command::UnknownApi => scenarios::unknown_api(&pipeline).await?,
        Command::Whitelist => scenarios::whitelist(&pipeline).await?,
        Command::Timeout => scenarios::timeout(&pipeline).await?,
        Command::Policies => scenarios::policies(&pipeline).await?,
    }

    pipeline.store.shutdown().await
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("JADE: Capability Mediation Pipeline");
    println!("===================================");
    println!();
    println!("Per page call:");
    println!("  [1] Interceptor wraps the API and sends a permission request");
    println!("  [2] Mediator decides from its cached origin policy");
    println!("  [3] No answer within the deadline: denied (fail-closed)");
    println!("  [4] Allowed calls reach the real API; denied ones follow its error contract");
    println!("  [5] Every decision is written to the policy store's audit log");
    println!();
}
