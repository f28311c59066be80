//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use futures_util::FutureExt;
use tokio::net::TcpListener;

use waypoint::http::Handler;
use waypoint::{handler_fn, Context, Engine, Flow, HttpServer, Next, ServiceConfig, Shutdown};

/// Ordered record of which handlers ran.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Middleware that records its name, then either continues or aborts.
pub struct Mark {
    name: &'static str,
    abort: bool,
    journal: Journal,
}

impl Mark {
    pub fn pass(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            abort: false,
            journal: journal.clone(),
        }
    }

    pub fn abort(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            abort: true,
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl Handler for Mark {
    async fn call(&self, ctx: &mut Context, next: Next<'_>) -> Flow {
        self.journal.lock().unwrap().push(self.name.to_string());
        if self.abort {
            return ctx.fail(StatusCode::FORBIDDEN, self.name);
        }
        next.run(ctx).await
    }
}

/// Endpoint writing a fixed text body.
pub fn text(body: &'static str) -> impl Handler {
    handler_fn(move |ctx| {
        async move {
            ctx.string(StatusCode::OK, body);
        }
        .boxed()
    })
}

/// Endpoint that sleeps before answering.
pub fn slow(delay: Duration) -> impl Handler {
    handler_fn(move |ctx| {
        async move {
            tokio::time::sleep(delay).await;
            ctx.string(StatusCode::OK, "slow");
        }
        .boxed()
    })
}

/// Configuration for tests: loopback, no shedding.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.service_name = "waypoint-test".into();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.load_shed.enabled = false;
    config
}

/// Serve `engine` on an ephemeral port.
pub async fn start_server(engine: Engine, config: &ServiceConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = HttpServer::new(engine, config);
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    (addr, shutdown)
}

/// A client that does not pool connections between tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
