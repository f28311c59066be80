//! Request rate ceiling.
//!
//! A single token bucket shared by every client: `max` tokens per second,
//! up to `burst` stored. Requests over the ceiling get 400 and never reach
//! downstream handlers.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::config::RateLimitConfig;
use crate::http::chain::{Flow, Handler, Next};
use crate::http::context::Context;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Global rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    /// `None` when the configured rate disables limiting.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        if !config.max.is_finite() || config.max <= 0.0 {
            return None;
        }

        let burst = if config.burst > 0 {
            f64::from(config.burst)
        } else {
            config.max.ceil().max(1.0)
        };
        Some(Self::new(config.max, burst))
    }

    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(burst)),
            rate,
            burst,
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_acquire(self.burst, self.rate)
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }
}

/// Middleware rejecting requests over the global ceiling.
#[derive(Debug)]
pub struct RateLimit {
    limiter: Option<RateLimiter>,
}

impl RateLimit {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limiter: RateLimiter::from_config(config),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }
}

#[async_trait]
impl Handler for RateLimit {
    async fn call(&self, ctx: &mut Context, _next: Next<'_>) -> Flow {
        match &self.limiter {
            Some(limiter) if !limiter.allow() => {
                tracing::debug!(
                    trace_id = %ctx.trace_id(),
                    path = %ctx.path(),
                    "Rate limit exceeded"
                );
                metrics::record_rejected("rate_limit");
                ctx.fail(StatusCode::BAD_REQUEST, "request rate limit exceeded")
            }
            _ => Flow::Continue,
        }
    }
}
