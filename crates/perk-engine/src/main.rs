//! # perk
//!
//! Command-line front end for the rewards engine.
//!
//! ```text
//! perk activate rulesets/card-1-2024.json
//! perk ingest transactions.json
//! perk evaluate tx-1 tx-2 tx-3
//! perk replay 7f3c9a52-...
//! perk breakdown tx-1
//! perk balance card-1 7f3c9a52-... 2024-03
//! ```

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match perk_engine::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
