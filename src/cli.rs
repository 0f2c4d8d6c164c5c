//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use crate::app::{health_check, resolve_trade, Config, Engine, HealthStatus};
use crate::error::{Error, Result};

/// Real-time triangular arbitrage detection and execution engine.
#[derive(Parser)]
#[command(name = "trireme", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "trireme.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the engine (default).
    Run,
    /// Validate configuration and report readiness.
    Check,
    /// Unwind a PARTIAL trade into USD and mark it RESOLVED.
    Resolve {
        /// Trade id of the partial trade.
        trade_id: String,
    },
}

/// Dispatch the parsed command line.
///
/// # Errors
/// Returns configuration, startup, and execution errors for `main` to
/// surface.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    config.init_logging();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => check(&config),
        Command::Resolve { trade_id } => {
            let resolved = resolve_trade(config, &trade_id).await?;
            println!(
                "Trade {} resolved: ${} realized",
                resolved.trade_id,
                resolved
                    .resolved_amount_usd
                    .map(|v| v.round_dp(2).to_string())
                    .unwrap_or_default()
            );
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engine = tokio::spawn(Engine::run_with_shutdown(config, shutdown_rx));

    tokio::select! {
        result = &mut engine => {
            return result.map_err(|e| Error::Execution(e.to_string()))?;
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    // Drain: in-flight legs complete, new work is refused
    engine
        .await
        .map_err(|e| Error::Execution(e.to_string()))?
}

fn check(config: &Config) -> Result<()> {
    let report = health_check(config);
    for check in report.checks() {
        let marker = if check.is_healthy() { "ok" } else { "FAIL" };
        match check.status() {
            HealthStatus::Healthy => println!("[{marker}] {}", check.name()),
            HealthStatus::Unhealthy(reason) => {
                println!("[{marker}] {}: {reason}", check.name());
            }
        }
    }

    if report.is_healthy() {
        println!("Configuration OK");
        Ok(())
    } else {
        Err(Error::Config("health check failed".to_string()))
    }
}
