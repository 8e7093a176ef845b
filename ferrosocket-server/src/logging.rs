//! Logging bootstrap
//!
//! ferrosocket emits `tracing` events everywhere; installing a subscriber is
//! left to the application. [`init_logging`] is the stock choice: a `fmt`
//! layer filtered by `RUST_LOG`, or by the configured filter when that
//! variable is unset.

/// Install a global `fmt` subscriber.
///
/// `default_filter` uses `EnvFilter` syntax, e.g. `"info"` or
/// `"ferrosocket_server=debug,info"`. Fails if a global subscriber is
/// already installed or the filter does not parse.
#[cfg(feature = "logging")]
pub fn init_logging(default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging(_default_filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "logging")]
    #[test]
    fn test_invalid_filter_is_rejected() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(init_logging("ferrosocket_server=loud").is_err());
        }
    }

    #[cfg(not(feature = "logging"))]
    #[test]
    fn test_init_logging_without_feature() {
        assert!(init_logging("info").is_ok());
    }
}
