//! Waypoint service binary.
//!
//! Loads configuration (TOML file or `WAYPOINT_*` environment), installs
//! logging and the metrics exporter, registers the demo routes and serves
//! until SIGINT/SIGTERM.

use std::path::PathBuf;

use axum::http::StatusCode;
use clap::Parser;
use futures_util::FutureExt;
use tokio::net::TcpListener;

use waypoint::config::{self, ServiceConfig};
use waypoint::lifecycle::signals;
use waypoint::observability::{logging, metrics};
use waypoint::{handler_fn, middleware_fn, Engine, HttpServer, RouteError, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "waypoint", version, about = "HTTP request-dispatch service")]
struct Args {
    /// Path to a TOML configuration file. Without it, WAYPOINT_* variables
    /// over defaults are used.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::from_env()?,
    };

    logging::init_logging(&config.log)?;

    tracing::info!("waypoint v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        service = %config.service_name,
        bind_address = %config.listener.bind_address,
        timeout_ms = config.system.timeout_ms,
        load_shed = config.load_shed.enabled,
        ip_limit = config.ip_limit.max,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let engine = build_engine(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(engine, &config);
    let serving = tokio::spawn(server.run(listener, shutdown.subscribe()));

    signals::wait_for_signal().await;
    shutdown.trigger();
    serving.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Register the demo routes.
fn build_engine(config: &ServiceConfig) -> Result<Engine, RouteError> {
    let mut engine = Engine::new(config);

    engine.get(
        "/ping",
        handler_fn(|ctx| {
            async move {
                ctx.string(StatusCode::OK, "pong");
            }
            .boxed()
        }),
    )?;

    engine.get(
        "/hello/:name",
        handler_fn(|ctx| {
            async move {
                let name = ctx.param("name").unwrap_or("stranger").to_string();
                let trace_id = ctx.trace_id().to_string();
                ctx.json(
                    StatusCode::OK,
                    &serde_json::json!({ "hello": name, "trace_id": trace_id }),
                );
            }
            .boxed()
        }),
    )?;

    let mut api = engine.group("/api");
    api.use_middleware(middleware_fn(|ctx, next| {
        async move {
            let span = ctx.span().clone();
            let flow = next.run(ctx).await;
            span.in_scope(|| tracing::info!(status = ctx.status_code().as_u16(), "api request served"));
            flow
        }
        .boxed()
    }));
    api.post(
        "/echo",
        handler_fn(|ctx| {
            async move {
                match ctx.bind_json::<serde_json::Value>() {
                    Ok(body) => ctx.json(StatusCode::OK, &body),
                    Err(e) => {
                        let message = format!("invalid JSON body: {e}");
                        ctx.fail(StatusCode::BAD_REQUEST, &message);
                    }
                }
            }
            .boxed()
        }),
    )?;

    if std::path::Path::new("public").is_dir() {
        engine.static_files("/assets", "public")?;
    }

    Ok(engine)
}
