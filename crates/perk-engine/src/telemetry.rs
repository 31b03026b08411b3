//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

use crate::error::{EngineError, EngineResult};

/// Filter used when neither `RUST_LOG` nor `[log] filter` is set.
pub const DEFAULT_FILTER: &str = "info,perk=debug,sqlx=warn";

/// Picks the filter directive: `RUST_LOG`, then the configured filter,
/// then [`DEFAULT_FILTER`].
pub fn env_filter(configured: Option<&str>) -> EngineResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(configured.unwrap_or(DEFAULT_FILTER))
        .map_err(|e| EngineError::InvalidConfig(format!("log.filter: {}", e)))
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=perk=trace` - Show trace for perk crates only
/// - Default: [`DEFAULT_FILTER`]
pub fn init_tracing(configured: Option<&str>) -> EngineResult<()> {
    let filter = env_filter(configured)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| EngineError::LoggingFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_a_config_error() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let err = env_filter(Some("perk=notalevel")).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
