//! Admission control stack.
//!
//! # Order (outermost first)
//! ```text
//! Timeout      → bounds everything below, drops it on expiry
//! LoadShed     → refuses work while overloaded
//! Recovery     → turns panics below into 500
//! TraceLog     → trace id + request span
//! RateLimit    → global request ceiling
//! [group middleware, route endpoint]
//! ```
//!
//! # Design Decisions
//! - Disabled policies are left out of the chain rather than passed through
//! - Built once per engine; every request shares the same handler instances

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::http::chain::BoxHandler;
use crate::observability::TraceLog;
use crate::resilience::{AdaptiveShedder, LoadShed, Recovery, Timeout};
use crate::security::RateLimit;

/// Build the admission middleware described by `config`.
pub fn admission_stack(config: &ServiceConfig) -> Vec<BoxHandler> {
    let mut stack: Vec<BoxHandler> = Vec::with_capacity(5);

    if let Some(duration) = config.system.timeout() {
        stack.push(Arc::new(Timeout::new(duration)));
    }

    if config.load_shed.enabled {
        let shedder = AdaptiveShedder::new(&config.load_shed);
        stack.push(Arc::new(LoadShed::new(Arc::new(shedder))));
    }

    stack.push(Arc::new(Recovery));
    stack.push(Arc::new(TraceLog::new(config.trace_key())));

    let rate_limit = RateLimit::new(&config.ip_limit);
    if rate_limit.is_enabled() {
        stack.push(Arc::new(rate_limit));
    }

    tracing::debug!(
        timeout_ms = config.system.timeout_ms,
        load_shed = config.load_shed.enabled,
        ip_limit = config.ip_limit.max,
        handlers = stack.len(),
        "Admission stack assembled"
    );

    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_stack() {
        let mut config = ServiceConfig::default();
        config.load_shed.enabled = false;
        // Recovery and trace are always present.
        assert_eq!(admission_stack(&config).len(), 2);
    }

    #[test]
    fn test_full_stack() {
        let mut config = ServiceConfig::default();
        config.system.timeout_ms = 100;
        config.ip_limit.max = 10.0;
        assert_eq!(admission_stack(&config).len(), 5);
    }
}
