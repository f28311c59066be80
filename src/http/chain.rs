//! Middleware chain and continuation protocol.
//!
//! # Responsibilities
//! - Define the `Handler` trait shared by middleware and endpoints
//! - Drive an ordered handler slice for one request
//! - Give each handler an explicit `Next` continuation
//!
//! # Protocol
//! ```text
//! for handler in chain:
//!     flow = handler.call(ctx, next)
//!     Abort             → stop, nothing downstream runs
//!     called next.run   → downstream already ran, stop
//!     Continue          → fall through to the following handler
//! ```
//!
//! # Design Decisions
//! - `Next::run` consumes the continuation, so downstream runs at most once
//!   per handler invocation
//! - Abort is a returned value, never shared-state mutation
//! - Handlers are `Arc<dyn Handler>` so one chain can be assembled per
//!   request from registration-time pieces

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::http::context::Context;

/// Outcome of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Proceed with the rest of the chain (unless it already ran).
    Continue,
    /// Stop; no further handler runs.
    Abort,
}

impl Flow {
    pub fn is_abort(self) -> bool {
        self == Flow::Abort
    }
}

/// A middleware or route endpoint.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow;
}

/// Shared handle to a handler.
pub type BoxHandler = Arc<dyn Handler>;

/// Continuation over the handlers after the current one.
#[derive(Debug)]
pub struct Next<'a> {
    chain: &'a [BoxHandler],
    resumed: &'a AtomicBool,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain now.
    pub async fn run(self, ctx: &mut Context) -> Flow {
        self.resumed.store(true, Ordering::Relaxed);
        run_chain(self.chain, ctx).await
    }

    /// Take an owned copy of the rest of the chain, e.g. to run it on a
    /// spawned task. Counts as resuming: the driver will not run it again.
    pub fn detach(self) -> Vec<BoxHandler> {
        self.resumed.store(true, Ordering::Relaxed);
        self.chain.to_vec()
    }

    /// Number of handlers still ahead.
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// Drive `chain` against `ctx`.
pub async fn run_chain(chain: &[BoxHandler], ctx: &mut Context) -> Flow {
    let mut rest = chain;
    while let Some((head, tail)) = rest.split_first() {
        let resumed = AtomicBool::new(false);
        let flow = head
            .call(
                ctx,
                Next {
                    chain: tail,
                    resumed: &resumed,
                },
            )
            .await;

        if flow.is_abort() || resumed.load(Ordering::Relaxed) {
            return flow;
        }
        rest = tail;
    }
    Flow::Continue
}

/// Endpoint built from a closure.
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a route endpoint.
///
/// ```ignore
/// engine.get("/ping", handler_fn(|ctx| async move {
///     ctx.string(StatusCode::OK, "pong");
/// }.boxed()))?;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, ()> + Send + Sync + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'c> Fn(&'c mut Context) -> BoxFuture<'c, ()> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut Context, _next: Next<'_>) -> Flow {
        (self.0)(ctx).await;
        Flow::Continue
    }
}

/// Middleware built from a closure that receives the continuation.
pub struct MiddlewareFn<F>(F);

pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: for<'c> Fn(&'c mut Context, Next<'c>) -> BoxFuture<'c, Flow> + Send + Sync + 'static,
{
    MiddlewareFn(f)
}

#[async_trait]
impl<F> Handler for MiddlewareFn<F>
where
    F: for<'c> Fn(&'c mut Context, Next<'c>) -> BoxFuture<'c, Flow> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow {
        (self.0)(ctx, next).await
    }
}
