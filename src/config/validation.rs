//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (threshold, rate, window)
//! - Check that addresses and header names are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Zero timeout and zero rate are valid and mean "disabled"

use std::net::SocketAddr;

use axum::http::HeaderName;

use crate::config::schema::ServiceConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::new("service_name", "must not be empty"));
    }

    if HeaderName::try_from(config.trace_key()).is_err() {
        errors.push(ValidationError::new(
            "trace_key",
            format!("'{}' is not a valid header name", config.trace_key),
        ));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.load_shed.cpu_threshold > 1000 {
        errors.push(ValidationError::new(
            "load_shed.cpu_threshold",
            "must be per-mille (0..=1000)",
        ));
    }

    if config.load_shed.enabled {
        if config.load_shed.buckets == 0 {
            errors.push(ValidationError::new("load_shed.buckets", "must be at least 1"));
        } else if config.load_shed.window_ms < config.load_shed.buckets as u64 {
            errors.push(ValidationError::new(
                "load_shed.window_ms",
                "must give every bucket at least 1ms",
            ));
        }
    }

    if !config.ip_limit.max.is_finite() || config.ip_limit.max < 0.0 {
        errors.push(ValidationError::new(
            "ip_limit.max",
            "must be a finite, non-negative rate",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ServiceConfig::default();
        config.service_name = String::new();
        config.trace_key = "bad header".into();
        config.listener.bind_address = "nowhere".into();
        config.load_shed.cpu_threshold = 1200;
        config.ip_limit.max = -1.0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            [
                "service_name",
                "trace_key",
                "listener.bind_address",
                "load_shed.cpu_threshold",
                "ip_limit.max"
            ]
        );
    }

    #[test]
    fn test_zero_values_are_valid() {
        let mut config = ServiceConfig::default();
        config.system.timeout_ms = 0;
        config.ip_limit.max = 0.0;
        config.load_shed.cpu_threshold = 0;
        assert!(validate_config(&config).is_ok());
    }
}
