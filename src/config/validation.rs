//! Configuration validation utilities.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Check a name against the Prometheus metric-name grammar.
pub fn is_valid_metric_name(name: &str) -> bool {
    static METRIC_NAME: OnceLock<Regex> = OnceLock::new();
    METRIC_NAME
        .get_or_init(|| {
            Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("failed to compile metric name regex")
        })
        .is_match(name)
}

/// Check a name against the Prometheus label-name grammar.
pub fn is_valid_label_name(name: &str) -> bool {
    static LABEL_NAME: OnceLock<Regex> = OnceLock::new();
    LABEL_NAME
        .get_or_init(|| {
            Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("failed to compile label name regex")
        })
        .is_match(name)
}
