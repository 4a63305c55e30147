//! Structured logging setup.
//!
//! The crate itself only emits `tracing` events; applications and tests
//! call [`init_logging`] once to see them.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `reqscope=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Installs the global subscriber described by this config.
    pub fn init(&self) -> bool {
        init_logging(&self.level, self.json)
    }
}

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Returns false if a subscriber
/// was already installed, which makes repeated calls harmless.
pub fn init_logging(level: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = Registry::default().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init().is_ok()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: LoggingConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
    }

    #[test]
    fn test_second_init_is_rejected() {
        let _ = init_logging("debug", false);
        assert!(!init_logging("debug", true));
    }
}
