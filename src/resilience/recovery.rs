//! Panic recovery.
//!
//! # Responsibilities
//! - Catch panics raised while polling downstream handlers
//! - Capture the panic location and a symbolic backtrace
//! - Turn a fault into one opaque 500 response
//!
//! # Design Decisions
//! - A process-wide panic hook is installed once. Panics raised inside a
//!   recovery scope are recorded in a thread-local slot instead of being
//!   printed; panics elsewhere go to the previous hook
//! - The scope is entered per poll, never held across an await, so task
//!   migration between worker threads cannot leak it
//! - Panic details are logged, never written to the response
//! - Headers a handler set before panicking are dropped; only the trace
//!   header survives into the 500

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Once;

use async_trait::async_trait;
use axum::http::StatusCode;
use futures_util::future::{poll_fn, FutureExt};

use crate::http::chain::{Flow, Handler, Next};
use crate::http::context::Context;
use crate::observability::metrics;

/// Paths of runtime, unwinding and async machinery.
const MACHINERY_PATHS: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures_util::",
    "futures_core::",
    "async_trait::",
];

/// Unmangled runtime symbols with no crate path.
const MACHINERY_SYMBOLS: &[&str] = &[
    "rust_begin_unwind",
    "__rust",
    "_start",
    "__libc",
    "start_thread",
];

/// libc thread entry points, matched exactly.
const THREAD_ENTRY: &[&str] = &["clone", "clone3", "__clone"];

/// Functions of this module that sit between a panic and the handler.
const OWN_FRAMES: &[&str] = &["install_hook", "catch_panic"];

const MAX_FRAMES: usize = 32;

thread_local! {
    static SCOPE_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<(Option<String>, Vec<String>)>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// A caught panic.
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub message: String,
    pub location: Option<String>,
    pub frames: Vec<String>,
}

struct PanicScope;

impl PanicScope {
    fn enter() -> Self {
        SCOPE_DEPTH.with(|depth| depth.set(depth.get() + 1));
        PanicScope
    }

    fn active() -> bool {
        SCOPE_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for PanicScope {
    fn drop(&mut self) {
        SCOPE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !PanicScope::active() {
                previous(info);
                return;
            }
            let location = info.location().map(ToString::to_string);
            let frames = filter_frames(&Backtrace::force_capture().to_string());
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some((location, frames)));
        }));
    });
}

/// Keep the application frames of a rendered backtrace.
fn filter_frames(rendered: &str) -> Vec<String> {
    rendered
        .lines()
        .filter_map(|line| {
            let (index, symbol) = line.trim().split_once(": ")?;
            index.parse::<usize>().ok()?;
            Some(symbol.trim())
        })
        .filter(|symbol| !is_skipped(symbol))
        .take(MAX_FRAMES)
        .map(str::to_string)
        .collect()
}

/// Whether `symbol` is machinery or part of this module's own scaffolding.
///
/// Trait-impl frames (`<Type as Trait>::method`) are judged by their self
/// type, so `<OrderHandler as Handler>::call` is kept while
/// `<core::pin::Pin<P> as core::future::Future>::poll` and blanket impls
/// over a bare type parameter (`<F as ...>`) are not.
fn is_skipped(symbol: &str) -> bool {
    let path = symbol.strip_prefix('<').unwrap_or(symbol);
    let generic_self = symbol.starts_with('<')
        && path.split(" as ").next().is_some_and(|ty| !ty.contains("::"));
    if generic_self
        || THREAD_ENTRY.contains(&symbol)
        || MACHINERY_SYMBOLS.iter().any(|s| symbol.starts_with(s))
        || MACHINERY_PATHS.iter().any(|p| path.starts_with(p))
    {
        return true;
    }

    let Some(own) = path.strip_prefix(module_path!()).and_then(|rest| rest.strip_prefix("::")) else {
        return false;
    };
    OWN_FRAMES
        .iter()
        .any(|f| own.strip_prefix(f).is_some_and(|rest| rest.is_empty() || rest.starts_with("::")))
        || own.starts_with("Recovery as ")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Drive `future` to completion, catching any panic raised while polling it.
pub async fn catch_panic<F: Future>(future: F) -> Result<F::Output, PanicReport> {
    install_hook();

    let mut future = pin!(future);
    let guarded = poll_fn(|cx| {
        let _scope = PanicScope::enter();
        future.as_mut().poll(cx)
    });

    match AssertUnwindSafe(guarded).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let (location, frames) = LAST_PANIC
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_default();
            Err(PanicReport {
                message: panic_message(payload.as_ref()),
                location,
                frames,
            })
        }
    }
}

/// Middleware converting downstream panics into a 500 response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

#[async_trait]
impl Handler for Recovery {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow {
        let outcome = catch_panic(next.run(ctx)).await;
        match outcome {
            Ok(flow) => flow,
            Err(report) => {
                tracing::error!(
                    trace_id = %ctx.trace_id(),
                    path = %ctx.path(),
                    panic = %report.message,
                    location = report.location.as_deref().unwrap_or("unknown"),
                    frames = ?report.frames,
                    "Handler panicked"
                );
                metrics::record_panic();
                ctx.reset_response();
                ctx.fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}
