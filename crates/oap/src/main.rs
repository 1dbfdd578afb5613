//! OAP - Observability Analysis Platform core
//!
//! Single binary that provides:
//! - OAL script compilation with optional debug source emission
//! - Replay of recorded source events through the compiled metrics
//! - A long running analysis server fed with JSON lines on stdin

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use clap::{Parser, Subcommand};
use tracing::info;
use anyhow::Result;

use oap_common::config::{ApdexConfig, LoggingConfig};

mod cli;
mod config;
mod server;

use server::AnalysisServer;

#[derive(Parser)]
#[command(name = "oap")]
#[command(author, version, about = "OAP - OAL analysis core", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the analysis server, reading events from stdin
    Server {
        /// Configuration file path
        #[arg(short, long, default_value = "/etc/oap/oap.toml", env = "OAP_CONFIG")]
        config: String,
    },

    /// Compile OAL scripts and report the generated metrics
    Compile {
        /// Script files, compiled together in order
        #[arg(required = true)]
        scripts: Vec<String>,

        /// Write rendered unit and dispatcher sources here
        #[arg(short, long, env = "OAP_OAL_DEBUG_DIR")]
        emit_dir: Option<String>,
    },

    /// Replay a JSON lines event file and print the persisted rows
    Replay {
        /// Configuration file path
        #[arg(short, long, default_value = "/etc/oap/oap.toml", env = "OAP_CONFIG")]
        config: String,

        /// Event file, one source event per line
        #[arg(short, long)]
        events: String,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            let config = config::load(&config).await?;
            init_tracing(&config.logging)?;
            info!("Starting OAP analysis server...");

            let server = AnalysisServer::new(config).await?;

            // Handle shutdown gracefully
            let shutdown = async {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
            };

            tokio::select! {
                result = server.run() => result?,
                () = shutdown => {}
            }
            let report = server.shutdown().await?;
            info!(units = report.total(), "Final flush done");
        }

        Commands::Compile { scripts, emit_dir } => {
            init_tracing(&LoggingConfig::default())?;

            let compiled = server::compile_scripts(&scripts, emit_dir, &ApdexConfig::default()).await?;
            cli::print_compile_summary(&compiled);
        }

        Commands::Replay { config, events, format } => {
            let config = config::load(&config).await?;
            init_tracing(&config.logging)?;

            let server = AnalysisServer::new(config).await?;
            let summary = server.replay(&events).await?;
            let report = server.shutdown().await?;
            cli::print_replay(&summary, &report, server.storage(), &format)?;
        }

        Commands::Version => {
            println!("OAP analysis core version {}", env!("CARGO_PKG_VERSION"));
            println!("Build: pure Rust OAL compiler and aggregation runtime");
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` wins over the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(&logging.level)?,
    };

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
