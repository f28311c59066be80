//! Configuration loading from disk or the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::ServiceConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build configuration from `WAYPOINT_*` environment variables over defaults.
pub fn from_env() -> Result<ServiceConfig, ConfigError> {
    from_lookup(|var| std::env::var(var).ok())
}

/// Build configuration from an arbitrary variable source.
pub fn from_lookup<F>(lookup: F) -> Result<ServiceConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ServiceConfig::default();

    if let Some(name) = lookup("WAYPOINT_SERVICE_NAME") {
        config.service_name = name;
    }
    if let Some(key) = lookup("WAYPOINT_TRACE_KEY") {
        config.trace_key = key;
    }
    if let Some(addr) = lookup("WAYPOINT_BIND_ADDRESS") {
        config.listener.bind_address = addr;
    }
    if let Some(level) = lookup("WAYPOINT_LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(ms) = parse_var(&lookup, "WAYPOINT_TIMEOUT_MS")? {
        config.system.timeout_ms = ms;
    }
    if let Some(threshold) = parse_var(&lookup, "WAYPOINT_CPU_THRESHOLD")? {
        config.load_shed.cpu_threshold = threshold;
    }
    if let Some(max) = parse_var(&lookup, "WAYPOINT_IP_LIMIT_MAX")? {
        config.ip_limit.max = max;
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}
