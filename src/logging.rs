//! Log output setup for binaries embedding taskchain.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over [`LoggingConfig::level`].
///
/// # Errors
///
/// Returns [`Error::Config`] if the level is not a valid filter directive or
/// a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::config(format!("invalid log level '{}': {e}", config.level)))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.pretty {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| Error::config(format!("failed to install subscriber: {e}")))
}
