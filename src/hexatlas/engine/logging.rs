use tracing_subscriber::EnvFilter;

use crate::hexatlas::engine::error::{EngineError, Result};

/// Installs the global `tracing` subscriber. `RUST_LOG` takes precedence;
/// otherwise the level is `info`, or `debug` when `verbose` is set.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| EngineError::Logging(err.to_string()))
}
