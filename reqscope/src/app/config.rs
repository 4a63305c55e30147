//! Application-wide configuration.

use crate::errors::ScopeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cache lifetime for files sent without an explicit timeout.
pub const DEFAULT_SEND_FILE_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Configuration shared by every context of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Host (and optional port) used for external URLs built outside a
    /// request.
    pub server_name: Option<String>,
    /// Path prefix of the application when no request supplies one.
    pub application_root: String,
    /// Scheme for external URLs built outside a request.
    pub preferred_url_scheme: String,
    /// Key enabling writable sessions.
    pub secret_key: Option<String>,
    /// Cache max-age for files sent without an explicit timeout.
    #[serde(with = "duration_secs")]
    pub send_file_max_age_default: Duration,
    /// Routes are bound to hosts; URLs take the host of their route.
    pub host_matching: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_name: None,
            application_root: "/".to_string(),
            preferred_url_scheme: "http".to_string(),
            secret_key: None,
            send_file_max_age_default: DEFAULT_SEND_FILE_MAX_AGE,
            host_matching: false,
        }
    }
}

impl AppConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from JSON; missing keys keep their defaults.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ScopeError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Sets the server name.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Sets the application root.
    #[must_use]
    pub fn with_application_root(mut self, root: impl Into<String>) -> Self {
        self.application_root = root.into();
        self
    }

    /// Sets the preferred URL scheme.
    #[must_use]
    pub fn with_preferred_url_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.preferred_url_scheme = scheme.into();
        self
    }

    /// Sets the secret key.
    #[must_use]
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// Sets the default send-file max-age.
    #[must_use]
    pub fn with_send_file_max_age_default(mut self, max_age: Duration) -> Self {
        self.send_file_max_age_default = max_age;
        self
    }

    /// Enables or disables host matching.
    #[must_use]
    pub fn with_host_matching(mut self, enabled: bool) -> Self {
        self.host_matching = enabled;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where D: Deserializer<'de> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
