/// Tracing subscriber setup.
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info";

/// Build the filter: `RUST_LOG` first, then the configured directive, then `info`.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    config
        .filter
        .as_deref()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global fmt subscriber. Returns false when one is already set.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            filter: Some("rtmlink_core=debug".into()),
            ansi: false,
        };
        let _first = init_tracing(&config);
        assert!(!init_tracing(&config));
    }

    #[test]
    fn test_bad_directive_falls_back() {
        let config = LoggingConfig {
            filter: Some("[[not a filter".into()),
            ansi: false,
        };
        // must not panic
        let _ = build_filter(&config);
    }
}
