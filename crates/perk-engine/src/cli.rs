//! `perk` command line.

use clap::{Parser, Subcommand};
use perk_core::Transaction;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "perk",
    about = "Evaluate card rewards against versioned rulesets",
    version
)]
pub struct Cli {
    /// Path to perk.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate and activate a ruleset document
    Activate {
        /// Ruleset JSON document
        path: PathBuf,
    },
    /// Load normalized transactions from a JSON array
    Ingest {
        /// Transactions JSON file
        path: PathBuf,
    },
    /// Evaluate one or more transactions
    Evaluate {
        #[arg(required = true)]
        transaction_ids: Vec<String>,
    },
    /// Re-evaluate every transaction rewarded under a ruleset
    Replay { ruleset_id: String },
    /// Show why a transaction earned what it earned
    Breakdown { transaction_id: String },
    /// Show the cap balance for a card, ruleset and period (YYYY-MM)
    Balance {
        card_id: String,
        ruleset_id: String,
        period: String,
    },
}

pub async fn run() -> EngineResult<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config)?;
    telemetry::init_tracing(config.log.filter.as_deref())?;

    let engine = Engine::open(&config).await?;
    let result = execute(&engine, cli.command).await;
    engine.database().close().await;
    result
}

async fn execute(engine: &Engine, command: Command) -> EngineResult<()> {
    match command {
        Command::Activate { path } => {
            let ruleset = engine.activate_ruleset(&read(&path)?).await?;
            print_json(&ruleset.header())
        }
        Command::Ingest { path } => {
            let transactions: Vec<Transaction> = serde_json::from_str(&read(&path)?)?;
            print_json(&engine.ingest_transactions(&transactions).await?)
        }
        Command::Evaluate { transaction_ids } => {
            let mut failed = 0;
            for (transaction_id, result) in engine.evaluate_many(&transaction_ids).await {
                match result {
                    Ok(report) => print_json(&report)?,
                    Err(err) => {
                        failed += 1;
                        eprintln!("{}: {} (retryable: {})", transaction_id, err, err.is_retryable());
                    }
                }
            }
            if failed > 0 {
                return Err(EngineError::Internal(format!(
                    "{} of {} evaluations failed",
                    failed,
                    transaction_ids.len()
                )));
            }
            Ok(())
        }
        Command::Replay { ruleset_id } => print_json(&engine.replay_ruleset(&ruleset_id).await?),
        Command::Breakdown { transaction_id } => {
            print_json(&engine.breakdown(&transaction_id).await?)
        }
        Command::Balance {
            card_id,
            ruleset_id,
            period,
        } => print_json(&engine.balance(&card_id, &ruleset_id, &period).await?),
    }
}

fn read(path: &Path) -> EngineResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| EngineError::InvalidInput(format!("{}: {}", path.display(), e)))
}

fn print_json<T: Serialize>(value: &T) -> EngineResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_balance() {
        let cli = Cli::try_parse_from(["perk", "--config", "perk.toml", "balance", "card-1", "rs-1", "2024-03"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("perk.toml")));
        assert!(matches!(cli.command, Command::Balance { ref period, .. } if period == "2024-03"));
    }

    #[test]
    fn test_evaluate_requires_ids() {
        assert!(Cli::try_parse_from(["perk", "evaluate"]).is_err());
    }
}
