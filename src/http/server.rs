//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum Router that feeds every request to the engine
//! - Collect the request body within the configured limit
//! - Bind server to listener and serve until shutdown
//!
//! # Design Decisions
//! - Axum only hosts the connection; routing and middleware belong to the
//!   engine, so the Router has a single fallback handler
//! - The peer address comes from `ConnectInfo` when served, and is simply
//!   absent when the router is driven directly (tests)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ServiceConfig;
use crate::http::context::Context;
use crate::http::engine::Engine;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    max_body_bytes: usize,
}

/// HTTP server hosting an [`Engine`].
pub struct HttpServer {
    router: Router,
    engine: Arc<Engine>,
}

impl HttpServer {
    /// Create a new HTTP server for a fully registered engine.
    pub fn new(engine: Engine, config: &ServiceConfig) -> Self {
        let engine = Arc::new(engine);
        let state = AppState {
            engine: engine.clone(),
            max_body_bytes: config.listener.max_body_bytes,
        };

        let router = Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(DefaultBodyLimit::disable());

        Self { router, engine }
    }

    /// The Axum router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Run the server, accepting connections until shutdown is signalled.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.engine.service_name(),
            routes = self.engine.routes().len(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Fallback handler: every request goes through the engine.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(path = %parts.uri.path(), error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let mut ctx = Context::from_parts(parts, body);
    if let Some(addr) = remote_addr {
        ctx = ctx.with_remote_addr(addr);
    }

    state.engine.handle_request(&mut ctx).await;
    ctx.into_response()
}
