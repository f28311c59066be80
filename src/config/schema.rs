//! Configuration schema definitions.
//!
//! This module defines the configuration snapshot handed to the dispatcher
//! and the admission-control middleware at startup.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header carrying the trace id when none is configured.
pub const DEFAULT_TRACE_KEY: &str = "x-trace-id";

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, attached to every request context and log line.
    pub service_name: String,

    /// Request header holding the inbound trace id.
    pub trace_key: String,

    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Global request settings (timeout).
    pub system: SystemConfig,

    /// Adaptive load shedding.
    pub load_shed: LoadShedConfig,

    /// Global request rate ceiling.
    pub ip_limit: RateLimitConfig,

    /// Logging output.
    pub log: LogConfig,

    /// Metrics exporter.
    pub observability: ObservabilityConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "waypoint".to_string(),
            trace_key: DEFAULT_TRACE_KEY.to_string(),
            listener: ListenerConfig::default(),
            system: SystemConfig::default(),
            load_shed: LoadShedConfig::default(),
            ip_limit: RateLimitConfig::default(),
            log: LogConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// The trace header name, falling back to the default when blank.
    pub fn trace_key(&self) -> &str {
        if self.trace_key.trim().is_empty() {
            DEFAULT_TRACE_KEY
        } else {
            &self.trace_key
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Global request settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Whole-request timeout in milliseconds. 0 disables the guard.
    pub timeout_ms: u64,
}

impl SystemConfig {
    /// The configured timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Adaptive load shedding configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadShedConfig {
    /// Enable the shedder.
    pub enabled: bool,

    /// CPU usage (per-mille, 0..=1000) at which shedding may start.
    pub cpu_threshold: u64,

    /// Length of the statistics window in milliseconds.
    pub window_ms: u64,

    /// Number of buckets the window is split into.
    pub buckets: usize,
}

impl Default for LoadShedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 900,
            window_ms: 5_000,
            buckets: 50,
        }
    }
}

/// Request rate ceiling, shared by all clients.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per second. 0 disables the limiter.
    pub max: f64,

    /// Burst capacity. 0 derives it from `max`.
    pub burst: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
