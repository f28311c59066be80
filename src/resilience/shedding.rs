//! Adaptive load shedding.
//!
//! # Responsibilities
//! - Estimate the capacity the service is sustaining right now
//! - Reject new requests while the CPU is hot and in-flight work exceeds
//!   that capacity
//! - Learn from every admitted request's outcome
//!
//! # Algorithm
//! ```text
//! max_flight = max(1, max_pass_per_bucket × buckets_per_second × min_rt_ms / 1000)
//!
//! drop when (cpu ≥ threshold  or  dropped within the last second)
//!       and flying > 1 and flying > max_flight and avg_flying > max_flight
//! ```
//!
//! # Design Decisions
//! - Statistics live in a rolling window of buckets; the bucket being
//!   filled is ignored when estimating capacity
//! - `avg_flying` is an exponential moving average updated on release
//! - A `Promise` that is dropped without a report counts as a failure, so
//!   cancelled requests still release their in-flight slot
//! - CPU usage is a trait so tests can pin it

use std::fs;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::config::LoadShedConfig;
use crate::http::chain::{Flow, Handler, Next};
use crate::http::context::Context;
use crate::observability::metrics;

const FLYING_BETA: f64 = 0.9;
const COOL_OFF: Duration = Duration::from_secs(1);
const DEFAULT_MIN_RT_MS: f64 = 1000.0;

const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);
const CPU_BETA: f64 = 0.95;

/// Returned when the shedder refuses a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShedError {
    #[error("service overloaded")]
    Overloaded,
}

/// A load-shedding policy.
pub trait Shedder: Send + Sync + 'static {
    /// Admit a request, or refuse it under overload.
    fn allow(&self) -> Result<Promise, ShedError>;
}

/// Receiver of request outcomes.
pub trait Report: Send + Sync {
    fn pass(&self, rt: Duration);
    fn fail(&self);
}

/// Outcome token for one admitted request.
pub struct Promise {
    sink: Option<Arc<dyn Report>>,
    start: Instant,
}

impl Promise {
    pub fn new(sink: Arc<dyn Report>) -> Self {
        Self {
            sink: Some(sink),
            start: Instant::now(),
        }
    }

    /// The request completed normally.
    pub fn pass(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.pass(self.start.elapsed());
        }
    }

    /// The request failed.
    pub fn fail(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.fail();
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.fail();
        }
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("reported", &self.sink.is_none())
            .field("start", &self.start)
            .finish()
    }
}

// --- CPU usage ---

/// Source of CPU usage in per-mille (0..=1000).
pub trait CpuUsage: Send + Sync + 'static {
    fn usage(&self) -> u64;
}

/// Fixed, settable CPU usage.
#[derive(Debug, Default)]
pub struct FixedCpu(AtomicU64);

impl FixedCpu {
    pub fn new(usage: u64) -> Self {
        Self(AtomicU64::new(usage))
    }

    pub fn set(&self, usage: u64) {
        self.0.store(usage, Ordering::Relaxed);
    }
}

impl CpuUsage for FixedCpu {
    fn usage(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Host CPU usage sampled from `/proc/stat` by a background thread.
///
/// All instances share one sampler. Where `/proc/stat` is unavailable the
/// reading stays at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCpu;

static SYSTEM_CPU: OnceLock<Arc<AtomicU64>> = OnceLock::new();

impl SystemCpu {
    fn reading() -> &'static Arc<AtomicU64> {
        SYSTEM_CPU.get_or_init(|| {
            let usage = Arc::new(AtomicU64::new(0));
            let sampler = usage.clone();
            let spawned = thread::Builder::new()
                .name("waypoint-cpu".into())
                .spawn(move || sample_loop(&sampler));
            if let Err(e) = spawned {
                tracing::warn!(error = %e, "Failed to start CPU sampler");
            }
            usage
        })
    }
}

impl CpuUsage for SystemCpu {
    fn usage(&self) -> u64 {
        Self::reading().load(Ordering::Relaxed)
    }
}

fn sample_loop(usage: &AtomicU64) {
    let Some(mut previous) = read_cpu_times() else {
        tracing::debug!("CPU statistics unavailable; load shedding sees 0% CPU");
        return;
    };
    let mut ema = 0.0;

    loop {
        thread::sleep(CPU_SAMPLE_INTERVAL);
        let Some(current) = read_cpu_times() else {
            continue;
        };
        if let Some(sample) = busy_per_mille(previous, current) {
            ema = ema * CPU_BETA + sample * (1.0 - CPU_BETA);
            usage.store(ema.round() as u64, Ordering::Relaxed);
        }
        previous = current;
    }
}

/// (total, idle) jiffies from the aggregate `cpu` line.
fn read_cpu_times() -> Option<(u64, u64)> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    parse_cpu_line(stat.lines().next()?)
}

fn parse_cpu_line(line: &str) -> Option<(u64, u64)> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 4 {
        return None;
    }
    let total = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((total, idle))
}

fn busy_per_mille(previous: (u64, u64), current: (u64, u64)) -> Option<f64> {
    let total = current.0.checked_sub(previous.0)?;
    let idle = current.1.checked_sub(previous.1)?;
    if total == 0 {
        return None;
    }
    Some(1000.0 * (total.saturating_sub(idle)) as f64 / total as f64)
}

// --- Rolling window ---

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    sum: f64,
    count: u64,
}

/// Fixed-size ring of time buckets.
#[derive(Debug)]
struct RollingWindow {
    buckets: Vec<Bucket>,
    interval: Duration,
    offset: usize,
    last: Instant,
}

impl RollingWindow {
    fn new(size: usize, interval: Duration) -> Self {
        Self {
            buckets: vec![Bucket::default(); size.max(1)],
            interval,
            offset: 0,
            last: Instant::now(),
        }
    }

    /// Whole intervals elapsed since the current bucket started, capped at size.
    fn span(&self, now: Instant) -> usize {
        let elapsed = now.saturating_duration_since(self.last);
        let span = (elapsed.as_nanos() / self.interval.as_nanos().max(1)) as usize;
        span.min(self.buckets.len())
    }

    fn advance(&mut self, now: Instant) {
        let span = self.span(now);
        if span == 0 {
            return;
        }
        let size = self.buckets.len();
        for i in 0..span {
            self.buckets[(self.offset + i + 1) % size] = Bucket::default();
        }
        self.offset = (self.offset + span) % size;

        let elapsed = now.saturating_duration_since(self.last);
        let rem = elapsed.as_nanos() % self.interval.as_nanos().max(1);
        self.last = now - Duration::from_nanos(rem as u64);
    }

    fn add(&mut self, value: f64) {
        self.advance(Instant::now());
        let bucket = &mut self.buckets[self.offset];
        bucket.sum += value;
        bucket.count += 1;
    }

    /// Buckets still inside the window, excluding the one being filled.
    fn completed(&self) -> impl Iterator<Item = &Bucket> {
        let size = self.buckets.len();
        let span = self.span(Instant::now());
        let count = if span == 0 { size - 1 } else { size - span };
        let start = (self.offset + span + 1) % size;
        (0..count).map(move |i| &self.buckets[(start + i) % size])
    }
}

// --- Adaptive shedder ---

#[derive(Debug)]
struct ShedState {
    flying: AtomicI64,
    avg_flying: Mutex<f64>,
    passes: Mutex<RollingWindow>,
    response_times: Mutex<RollingWindow>,
    drop_time: Mutex<Option<Instant>>,
    dropped_recently: AtomicBool,
}

impl ShedState {
    fn add_flying(&self, delta: i64) {
        let flying = self.flying.fetch_add(delta, Ordering::SeqCst) + delta;
        // Only releases move the average, so bursts of arrivals do not
        // inflate it before any request has finished.
        if delta < 0 {
            let mut avg = self.avg_flying.lock().unwrap_or_else(PoisonError::into_inner);
            *avg = *avg * FLYING_BETA + flying as f64 * (1.0 - FLYING_BETA);
        }
    }
}

impl Report for ShedState {
    fn pass(&self, rt: Duration) {
        let rt_ms = (rt.as_secs_f64() * 1000.0).ceil();
        self.add_flying(-1);
        self.response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(rt_ms);
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(1.0);
    }

    fn fail(&self) {
        self.add_flying(-1);
    }
}

/// CPU-aware shedder estimating capacity from recent throughput.
pub struct AdaptiveShedder {
    state: Arc<ShedState>,
    cpu: Arc<dyn CpuUsage>,
    cpu_threshold: u64,
    buckets_per_second: f64,
}

impl std::fmt::Debug for AdaptiveShedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveShedder")
            .field("cpu_threshold", &self.cpu_threshold)
            .field("buckets_per_second", &self.buckets_per_second)
            .field("flying", &self.flying())
            .finish()
    }
}

impl AdaptiveShedder {
    /// Shedder reading host CPU usage.
    pub fn new(config: &LoadShedConfig) -> Self {
        Self::with_cpu(config, Arc::new(SystemCpu))
    }

    pub fn with_cpu(config: &LoadShedConfig, cpu: Arc<dyn CpuUsage>) -> Self {
        let buckets = config.buckets.max(1);
        let window = Duration::from_millis(config.window_ms.max(buckets as u64));
        let interval = window / buckets as u32;

        Self {
            state: Arc::new(ShedState {
                flying: AtomicI64::new(0),
                avg_flying: Mutex::new(0.0),
                passes: Mutex::new(RollingWindow::new(buckets, interval)),
                response_times: Mutex::new(RollingWindow::new(buckets, interval)),
                drop_time: Mutex::new(None),
                dropped_recently: AtomicBool::new(false),
            }),
            cpu,
            cpu_threshold: config.cpu_threshold,
            buckets_per_second: 1.0 / interval.as_secs_f64(),
        }
    }

    /// Requests currently admitted and not yet reported.
    pub fn flying(&self) -> i64 {
        self.state.flying.load(Ordering::SeqCst)
    }

    fn max_pass(&self) -> f64 {
        let passes = self.state.passes.lock().unwrap_or_else(PoisonError::into_inner);
        passes
            .completed()
            .map(|b| b.sum)
            .fold(1.0, f64::max)
    }

    fn min_rt(&self) -> f64 {
        let rts = self
            .state
            .response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        rts.completed()
            .filter(|b| b.count > 0)
            .map(|b| (b.sum / b.count as f64).round())
            .fold(DEFAULT_MIN_RT_MS, f64::min)
    }

    fn max_flight(&self) -> f64 {
        (self.max_pass() * self.buckets_per_second * self.min_rt() / 1000.0).max(1.0)
    }

    fn system_overloaded(&self) -> bool {
        self.cpu.usage() >= self.cpu_threshold
    }

    fn still_hot(&self) -> bool {
        if !self.state.dropped_recently.load(Ordering::SeqCst) {
            return false;
        }
        let drop_time = *self.state.drop_time.lock().unwrap_or_else(PoisonError::into_inner);
        let hot = drop_time.is_some_and(|t| t.elapsed() < COOL_OFF);
        if !hot {
            self.state.dropped_recently.store(false, Ordering::SeqCst);
        }
        hot
    }

    fn high_throughput(&self) -> bool {
        let flying = self.flying() as f64;
        let avg_flying = *self.state.avg_flying.lock().unwrap_or_else(PoisonError::into_inner);
        let max_flight = self.max_flight();
        flying > 1.0 && flying > max_flight && avg_flying > max_flight
    }

    fn should_drop(&self) -> bool {
        if !(self.system_overloaded() || self.still_hot()) || !self.high_throughput() {
            return false;
        }
        *self.state.drop_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        self.state.dropped_recently.store(true, Ordering::SeqCst);
        true
    }
}

impl Shedder for AdaptiveShedder {
    fn allow(&self) -> Result<Promise, ShedError> {
        if self.should_drop() {
            return Err(ShedError::Overloaded);
        }
        self.state.add_flying(1);
        Ok(Promise::new(self.state.clone()))
    }
}

/// Middleware rejecting requests the shedder refuses.
pub struct LoadShed {
    shedder: Arc<dyn Shedder>,
}

impl LoadShed {
    pub fn new(shedder: Arc<dyn Shedder>) -> Self {
        Self { shedder }
    }
}

#[async_trait]
impl Handler for LoadShed {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow {
        let promise = match self.shedder.allow() {
            Ok(promise) => promise,
            Err(e) => {
                tracing::debug!(path = %ctx.path(), reason = %e, "Request shed");
                metrics::record_rejected("load_shed");
                return ctx.fail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "system busy, please try again later",
                );
            }
        };

        let flow = next.run(ctx).await;
        if ctx.status_code().is_server_error() {
            promise.fail();
        } else {
            promise.pass();
        }
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::chain::{handler_fn, run_chain, BoxHandler};
    use axum::http::Method;
    use futures_util::FutureExt;

    fn config() -> LoadShedConfig {
        LoadShedConfig {
            enabled: true,
            cpu_threshold: 900,
            window_ms: 5_000,
            buckets: 50,
        }
    }

    fn shed_with(shedder: &Arc<AdaptiveShedder>) -> BoxHandler {
        Arc::new(LoadShed::new(shedder.clone()))
    }

    fn respond(status: StatusCode) -> BoxHandler {
        Arc::new(handler_fn(move |ctx| {
            async move {
                ctx.string(status, "done");
            }
            .boxed()
        }))
    }

    /// Entries in every bucket of `window`, the one being filled included.
    fn recorded(window: &Mutex<RollingWindow>) -> u64 {
        window.lock().unwrap().buckets.iter().map(|b| b.count).sum()
    }

    /// Hold `held` requests in flight and cycle short ones until the
    /// in-flight average settles near `held`. Needs a cool CPU.
    fn saturate(shedder: &AdaptiveShedder, held: usize) -> Vec<Promise> {
        let promises: Vec<_> = (0..held).map(|_| shedder.allow().unwrap()).collect();
        for _ in 0..40 {
            shedder.allow().unwrap().pass();
        }
        promises
    }

    #[test]
    fn test_promise_drop_counts_as_fail() {
        let shedder = AdaptiveShedder::with_cpu(&config(), Arc::new(FixedCpu::new(0)));
        let promise = shedder.allow().unwrap();
        assert_eq!(shedder.flying(), 1);
        drop(promise);
        assert_eq!(shedder.flying(), 0);

        shedder.allow().unwrap().pass();
        assert_eq!(shedder.flying(), 0);
    }

    #[test]
    fn test_cool_cpu_never_drops() {
        let shedder = AdaptiveShedder::with_cpu(&config(), Arc::new(FixedCpu::new(100)));
        let _held = saturate(&shedder, 60);
        assert!(shedder.allow().is_ok());
    }

    #[test]
    fn test_hot_cpu_and_high_flight_drops() {
        let cpu = Arc::new(FixedCpu::new(0));
        let shedder = AdaptiveShedder::with_cpu(&config(), cpu.clone());
        let held = saturate(&shedder, 60);

        cpu.set(950);
        assert_eq!(shedder.allow().unwrap_err(), ShedError::Overloaded);

        // Still hot within the cool-off period even if the CPU calms down.
        cpu.set(0);
        assert!(shedder.allow().is_err());

        drop(held);
    }

    #[test]
    fn test_low_flight_is_admitted_when_hot() {
        let shedder = AdaptiveShedder::with_cpu(&config(), Arc::new(FixedCpu::new(1000)));
        for _ in 0..5 {
            shedder.allow().unwrap().pass();
        }
        assert!(shedder.allow().is_ok());
    }

    #[test]
    fn test_rolling_window_ignores_current_bucket() {
        let mut window = RollingWindow::new(4, Duration::from_secs(60));
        window.add(5.0);
        assert_eq!(window.completed().count(), 3);
        assert!(window.completed().all(|b| b.count == 0));
    }

    #[test]
    fn test_parse_cpu_line() {
        let (total, idle) = parse_cpu_line("cpu  100 0 50 800 50 0 0 0 0 0").unwrap();
        assert_eq!(total, 1000);
        assert_eq!(idle, 850);
        assert!(parse_cpu_line("cpu0 1 2 3 4").is_none());

        assert_eq!(busy_per_mille((1000, 850), (2000, 1350)), Some(500.0));
        assert_eq!(busy_per_mille((1000, 850), (1000, 850)), None);
    }

    struct Refuse;

    impl Shedder for Refuse {
        fn allow(&self) -> Result<Promise, ShedError> {
            Err(ShedError::Overloaded)
        }
    }

    #[tokio::test]
    async fn test_middleware_rejects_with_500() {
        let shed: BoxHandler = Arc::new(LoadShed::new(Arc::new(Refuse)));
        let mut ctx = Context::new(Method::GET, "/".parse().unwrap());

        let flow = run_chain(&[shed], &mut ctx).await;
        assert_eq!(flow, Flow::Abort);
        assert_eq!(ctx.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ctx.response_body().as_ref(),
            r#"{"message":"system busy, please try again later"}"#.as_bytes()
        );
    }

    #[tokio::test]
    async fn test_success_is_reported_as_pass() {
        let shedder = Arc::new(AdaptiveShedder::with_cpu(&config(), Arc::new(FixedCpu::new(0))));
        let mut ctx = Context::new(Method::GET, "/".parse().unwrap());

        run_chain(&[shed_with(&shedder), respond(StatusCode::OK)], &mut ctx).await;

        assert_eq!(shedder.flying(), 0);
        assert_eq!(recorded(&shedder.state.passes), 1);
        assert_eq!(recorded(&shedder.state.response_times), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_reported_as_fail() {
        let shedder = Arc::new(AdaptiveShedder::with_cpu(&config(), Arc::new(FixedCpu::new(0))));
        let mut ctx = Context::new(Method::GET, "/".parse().unwrap());

        run_chain(
            &[shed_with(&shedder), respond(StatusCode::INTERNAL_SERVER_ERROR)],
            &mut ctx,
        )
        .await;

        assert_eq!(shedder.flying(), 0);
        assert_eq!(recorded(&shedder.state.passes), 0);
        assert_eq!(recorded(&shedder.state.response_times), 0);
    }

    #[tokio::test]
    async fn test_client_error_still_counts_as_pass() {
        let shedder = Arc::new(AdaptiveShedder::with_cpu(&config(), Arc::new(FixedCpu::new(0))));
        let mut ctx = Context::new(Method::GET, "/".parse().unwrap());

        run_chain(&[shed_with(&shedder), respond(StatusCode::NOT_FOUND)], &mut ctx).await;

        assert_eq!(recorded(&shedder.state.passes), 1);
    }
}
