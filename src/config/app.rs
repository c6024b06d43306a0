//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::metric::MetricSpec;
use super::validation::ConfigError;

/// Default HTTP port (conventional port for MongoDB exporters).
pub const DEFAULT_PORT: u16 = 9216;

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_prometheus_path() -> String {
    "/metrics".to_string()
}

fn default_health_path() -> String {
    "/readyz".to_string()
}

fn default_liveliness_path() -> String {
    "/healthz".to_string()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 9216).
    pub port: u16,

    /// Path serving the Prometheus exposition endpoint (default: "/metrics").
    pub prometheus: String,

    /// Path serving the readiness probe (default: "/readyz").
    pub health: String,

    /// Path serving the liveness probe (default: "/healthz").
    pub liveliness: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            prometheus: default_prometheus_path(),
            health: default_health_path(),
            liveliness: default_liveliness_path(),
        }
    }
}

/// MongoDB connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoDbConfig {
    /// Connection URI, e.g. `mongodb://localhost:27017`.
    pub uri: String,
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Config schema version tag (informational).
    #[serde(default)]
    pub version: Option<String>,

    /// HTTP server configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// MongoDB connection configuration.
    pub mongodb: MongoDbConfig,

    /// Metric definitions, one collector each.
    pub metrics: Vec<MetricSpec>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!("invalid HTTP bind address: '{}'", self.http.bind))
        })?;

        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "HTTP port must be non-zero".to_string(),
            ));
        }

        for path in [
            &self.http.prometheus,
            &self.http.health,
            &self.http.liveliness,
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "HTTP path must start with '/': '{path}'"
                )));
            }
        }

        if self.mongodb.uri.trim().is_empty() {
            return Err(ConfigError::Validation(
                "MongoDB URI cannot be empty".to_string(),
            ));
        }

        if self.metrics.is_empty() {
            return Err(ConfigError::Validation(
                "at least one metric must be configured".to_string(),
            ));
        }

        for (index, metric) in self.metrics.iter().enumerate() {
            metric.validate(index)?;
        }

        Ok(())
    }
}
