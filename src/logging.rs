use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Install a process-wide `tracing` subscriber.
///
/// `RUST_LOG` takes precedence when set; otherwise everything at `level` or
/// above is printed.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
#[allow(clippy::result_large_err)]
pub fn init(level: Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| Error::Config(format!("failed to install tracing subscriber: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_rejected() {
        let _ = init(Level::DEBUG);
        assert!(matches!(init(Level::INFO), Err(Error::Config(_))));
    }
}
