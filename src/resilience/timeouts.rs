//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the time spent in downstream handlers
//! - Publish the deadline on the work context
//! - Cancel downstream work cleanly on expiry
//!
//! # Design Decisions
//! - The rest of the chain runs on a spawned task with its own clone of the
//!   context; the request task races the `JoinHandle` against the deadline
//! - On expiry the handle is aborted and the 500 is written to the request's
//!   own context, so the answer goes out at the deadline even when a handler
//!   blocks its worker thread. A blocked handler only stops at its next
//!   await point; whatever it writes afterwards is discarded with its clone
//! - The clone shares the cancellation flag, so long-running handlers can
//!   poll `work().is_cancelled()` and stop early
//! - A panic escaping the detached chain is resumed on the request task
//! - A zero duration disables the guard entirely
//! - Timed-out requests return 500 `{"message":"request timeout"}`

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::http::chain::{run_chain, Flow, Handler, Next};
use crate::http::context::Context;
use crate::observability::metrics;

/// Middleware enforcing a whole-request timeout.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_enabled(&self) -> bool {
        !self.duration.is_zero()
    }
}

#[async_trait]
impl Handler for Timeout {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow {
        if !self.is_enabled() {
            return next.run(ctx).await;
        }

        ctx.work_mut().set_deadline(Instant::now() + self.duration);
        let rest = next.detach();
        let mut detached = ctx.clone();
        let mut task = tokio::spawn(async move {
            let flow = run_chain(&rest, &mut detached).await;
            (detached, flow)
        });

        match tokio::time::timeout(self.duration, &mut task).await {
            Ok(Ok((finished, flow))) => {
                *ctx = finished;
                flow
            }
            Ok(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Ok(Err(e)) => {
                tracing::error!(path = %ctx.path(), error = %e, "Downstream task cancelled");
                ctx.reset_response();
                ctx.fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
            Err(_) => {
                task.abort();
                ctx.work().cancel();
                tracing::warn!(
                    trace_id = %ctx.trace_id(),
                    path = %ctx.path(),
                    timeout_ms = self.duration.as_millis() as u64,
                    "Request timed out"
                );
                metrics::record_timeout();
                ctx.reset_response();
                ctx.fail(StatusCode::INTERNAL_SERVER_ERROR, "request timeout")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::chain::{handler_fn, middleware_fn, BoxHandler};
    use axum::http::Method;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn sleeper(ms: u64, finished: Arc<AtomicBool>) -> BoxHandler {
        Arc::new(handler_fn(move |ctx| {
            let finished = finished.clone();
            async move {
                ctx.set_header("set-cookie", "session=half-built");
                tokio::time::sleep(Duration::from_millis(ms)).await;
                finished.store(true, Ordering::SeqCst);
                ctx.string(StatusCode::OK, "slow");
            }
            .boxed()
        }))
    }

    fn blocker(ms: u64, finished: Arc<AtomicBool>) -> BoxHandler {
        Arc::new(handler_fn(move |ctx| {
            let finished = finished.clone();
            async move {
                std::thread::sleep(Duration::from_millis(ms));
                finished.store(true, Ordering::SeqCst);
                ctx.string(StatusCode::OK, "blocked");
            }
            .boxed()
        }))
    }

    fn ctx() -> Context {
        Context::new(Method::GET, "/slow".parse().unwrap())
    }

    #[tokio::test]
    async fn test_times_out_and_cancels() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard: BoxHandler = Arc::new(Timeout::new(Duration::from_millis(10)));
        let chain = [guard, sleeper(50, finished.clone())];

        let mut c = ctx();
        let start = std::time::Instant::now();
        let flow = run_chain(&chain, &mut c).await;

        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(flow, Flow::Abort);
        assert_eq!(c.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(c.response_body().as_ref(), br#"{"message":"request timeout"}"#);
        assert_eq!(c.header("set-cookie"), None);
        assert!(c.work().is_cancelled());

        // The downstream task was aborted: it never completes.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(c.response_body().as_ref(), br#"{"message":"request timeout"}"#);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_handler_answered_at_deadline() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard: BoxHandler = Arc::new(Timeout::new(Duration::from_millis(10)));
        let chain = [guard, blocker(50, finished.clone())];

        let mut c = ctx();
        let start = std::time::Instant::now();
        let flow = run_chain(&chain, &mut c).await;

        assert!(start.elapsed() < Duration::from_millis(50), "took {:?}", start.elapsed());
        assert_eq!(flow, Flow::Abort);
        assert_eq!(c.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(c.response_body().as_ref(), br#"{"message":"request timeout"}"#);

        // The blocked handler runs to completion on its worker; its write is discarded.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(c.response_body().as_ref(), br#"{"message":"request timeout"}"#);
    }

    #[tokio::test]
    async fn test_timeout_keeps_only_trace_header() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard: BoxHandler = Arc::new(Timeout::new(Duration::from_millis(10)));
        let chain = [guard, sleeper(50, finished)];

        let mut c = ctx();
        c.set_trace_header("x-trace-id");
        c.set_header("x-trace-id", "upstream-trace");
        c.set_header("content-disposition", "attachment");
        run_chain(&chain, &mut c).await;

        assert_eq!(c.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(c.header("x-trace-id"), Some("upstream-trace"));
        assert_eq!(c.header("content-disposition"), None);
        assert_eq!(c.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_fast_handler_passes() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard: BoxHandler = Arc::new(Timeout::new(Duration::from_millis(200)));
        let chain = [guard, sleeper(1, finished.clone())];

        let mut c = ctx();
        let flow = run_chain(&chain, &mut c).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(c.status_code(), StatusCode::OK);
        assert_eq!(c.response_body().as_ref(), b"slow");
        assert_eq!(c.header("set-cookie"), Some("session=half-built"));
        assert!(finished.load(Ordering::SeqCst));
        assert!(c.work().deadline().is_some());
    }

    #[tokio::test]
    async fn test_downstream_abort_is_returned() {
        let guard: BoxHandler = Arc::new(Timeout::new(Duration::from_millis(200)));
        let deny: BoxHandler = Arc::new(middleware_fn(|ctx, _next| {
            async move { ctx.fail(StatusCode::FORBIDDEN, "denied") }.boxed()
        }));
        let never: BoxHandler = Arc::new(handler_fn(|_ctx| async move { unreachable!() }.boxed()));

        let mut c = ctx();
        let flow = run_chain(&[guard, deny, never], &mut c).await;
        assert_eq!(flow, Flow::Abort);
        assert_eq!(c.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_zero_is_passthrough() {
        let finished = Arc::new(AtomicBool::new(false));
        let guard: BoxHandler = Arc::new(Timeout::new(Duration::ZERO));
        let chain = [guard, sleeper(5, finished.clone())];

        let mut c = ctx();
        run_chain(&chain, &mut c).await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(c.work().deadline().is_none());
    }
}
