//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize the global tracing subscriber
///
/// Pairs with [`TracingLogger`](crate::logging::TracingLogger): records it
/// emits end up in this subscriber. An invalid `log_level` falls back to
/// `info`. Calling this again once a subscriber is installed does nothing.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.service.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    match installed {
        Ok(()) => {
            tracing::info!("Tracing initialized for service: {}", config.service.name);
        }
        Err(err) => {
            tracing::debug!(error = %err, "tracing subscriber already installed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_repeatable() {
        let mut config = Config::default();
        config.service.log_level = "not a [valid directive".to_string();

        assert!(init_tracing(&config).is_ok());
        config.service.json = true;
        assert!(init_tracing(&config).is_ok());
    }
}
