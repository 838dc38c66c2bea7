//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::executor::DEFAULT_TIMEOUT;
use crate::history::Retention;
use crate::server::DEFAULT_MAX_BODY_BYTES;
use crate::target::TargetSpec;

use super::error::ConfigError;

/// `${NAME}` or `${NAME:-fallback}`.
static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env reference pattern")
});

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Substitute environment references in a seed URL. Unset variables take
/// their fallback, or expand to nothing.
fn expand_env(url: &str) -> String {
    ENV_REFERENCE
        .replace_all(url, |caps: &Captures| {
            std::env::var(&caps[1])
                .unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,

    /// Maximum accepted request body size in bytes (default: 1 MiB).
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

// =============================================================================
// Fetch / History Configuration
// =============================================================================

/// Fetch executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout for one fetch attempt, body included (default: 5s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// History retention configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Keep at most this many records per target (default: unbounded).
    #[serde(default)]
    pub max_records: Option<usize>,
}

impl HistoryConfig {
    /// Retention policy described by this configuration.
    pub fn retention(&self) -> Retention {
        Retention::from_max_records(self.max_records)
    }
}

/// Target registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTarget {
    /// URL to poll; `${VAR}` and `${VAR:-default}` are expanded on load.
    pub url: String,
    /// Polling interval in seconds.
    pub interval: u32,
}

impl SeedTarget {
    /// Registration spec for this seed.
    pub fn to_spec(&self) -> TargetSpec {
        TargetSpec::new(self.url.clone(), self.interval)
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server configuration.
    pub server: ServerConfig,

    /// Fetch executor configuration.
    pub fetch: FetchConfig,

    /// History retention configuration.
    pub history: HistoryConfig,

    /// Targets registered at startup, in order.
    pub targets: Vec<SeedTarget>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Seed target URLs have environment variables expanded before
    /// validation.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        for target in &mut config.targets {
            target.url = expand_env(&target.url);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for an out-of-range setting and
    /// `ConfigError::InvalidTarget` for the first bad seed target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<IpAddr>().is_err() {
            return Err(ConfigError::invalid(
                "server.bind",
                format!("'{}' is not an IP address", self.server.bind),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must be non-zero"));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::invalid("server.max_body_bytes", "must be positive"));
        }
        if self.fetch.timeout.is_zero() {
            return Err(ConfigError::invalid("fetch.timeout", "must be positive"));
        }
        if self.history.max_records == Some(0) {
            return Err(ConfigError::invalid(
                "history.max_records",
                "must be positive when set",
            ));
        }

        for (index, target) in self.targets.iter().enumerate() {
            target
                .to_spec()
                .validate()
                .map_err(|source| ConfigError::InvalidTarget { index, source })?;
        }

        Ok(())
    }

    /// Registration specs for all seed targets, in file order.
    pub fn seed_specs(&self) -> Vec<TargetSpec> {
        self.targets.iter().map(SeedTarget::to_spec).collect()
    }
}
