//! Trace id propagation.
//!
//! # Responsibilities
//! - Extract the trace id from the configured request header
//! - Generate a UUID v4 when the header is absent or empty
//! - Echo the id on the response and bind it to the request span
//!
//! # Design Decisions
//! - The request span is the per-request logger: downstream handlers run
//!   instrumented with it, so their events carry `trace_id`
//! - Idempotent: a context that already has a trace id keeps it

use async_trait::async_trait;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DEFAULT_TRACE_KEY;
use crate::http::chain::{Flow, Handler, Next};
use crate::http::context::Context;

/// Middleware that assigns the trace id and request span.
#[derive(Debug, Clone)]
pub struct TraceLog {
    key: String,
}

impl TraceLog {
    /// Read trace ids from `key` (lowercased header name).
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into().to_ascii_lowercase(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn assign(&self, ctx: &mut Context) {
        let trace_id = ctx
            .request_header(&self.key)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        ctx.set_value(self.key.clone(), trace_id.clone());
        ctx.set_header(&self.key, &trace_id);
        ctx.set_trace_header(&self.key);

        let span = tracing::info_span!(
            "request",
            trace_id = %trace_id,
            method = %ctx.method(),
            path = %ctx.path(),
        );
        ctx.set_trace_id(trace_id);
        ctx.set_span(span);
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_KEY)
    }
}

#[async_trait]
impl Handler for TraceLog {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow {
        if ctx.trace_id().is_empty() {
            self.assign(ctx);
        }

        let span = ctx.span().clone();
        next.run(ctx).instrument(span).await
    }
}
