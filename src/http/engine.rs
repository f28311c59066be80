//! Request dispatcher and route groups.
//!
//! # Responsibilities
//! - Register routes and middleware, globally or per path-prefix group
//! - Assemble the handler chain for each request
//! - Serve static directories under a route prefix
//!
//! # Data Flow
//! ```text
//! Context (method, path)
//!     → groups whose prefix is a prefix of the path → middleware, in
//!       group registration order
//!     → RouteTable::lookup → pattern + params + endpoint
//!       (no route: 404 "NOT FOUND URL <path>" is written up front)
//!     → run_chain(middleware ++ [endpoint])
//!     → request metrics
//! ```
//!
//! # Design Decisions
//! - The engine is the root group (prefix "")
//! - Groups are stored flat with a parent index; a `RouterGroup` is a
//!   borrow of the engine, so registration ends before serving starts
//! - Prefix matching is plain string-prefix, as in the group definition

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};

use crate::config::ServiceConfig;
use crate::http::chain::{run_chain, BoxHandler, Flow, Handler, Next};
use crate::http::context::Context;
use crate::http::middleware::admission_stack;
use crate::observability::metrics;
use crate::routing::{RouteError, RouteTable};

#[derive(Debug)]
struct Group {
    prefix: String,
    middleware: Vec<BoxHandler>,
    parent: Option<usize>,
}

/// Route registry and per-request dispatcher.
#[derive(Debug)]
pub struct Engine {
    service_name: Arc<str>,
    groups: Vec<Group>,
    routes: RouteTable<BoxHandler>,
}

impl Engine {
    /// Engine whose root group carries the admission stack built from `config`.
    pub fn new(config: &ServiceConfig) -> Self {
        let mut engine = Self::bare(&config.service_name);
        engine.groups[0].middleware = admission_stack(config);
        engine
    }

    /// Engine without any middleware.
    pub fn bare(service_name: &str) -> Self {
        Self {
            service_name: Arc::from(service_name),
            groups: vec![Group {
                prefix: String::new(),
                middleware: Vec::new(),
                parent: None,
            }],
            routes: RouteTable::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn root(&mut self) -> RouterGroup<'_> {
        RouterGroup {
            engine: self,
            index: 0,
        }
    }

    /// Append global middleware.
    pub fn use_middleware(&mut self, handler: impl Handler) -> &mut Self {
        self.groups[0].middleware.push(Arc::new(handler));
        self
    }

    /// Create a route group under `prefix`.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup::create(self, 0, prefix)
    }

    pub fn handle(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.root().handle(method, pattern, handler)?;
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::DELETE, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::PATCH, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::HEAD, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::OPTIONS, pattern, handler)
    }

    /// Serve files below `root` at `GET relative/*filepath`.
    pub fn static_files(
        &mut self,
        relative: &str,
        root: impl AsRef<Path>,
    ) -> Result<&mut Self, RouteError> {
        self.root().static_files(relative, root)?;
        Ok(self)
    }

    /// All registered (method, pattern) pairs.
    pub fn routes(&self) -> Vec<(&Method, &str)> {
        self.routes.routes()
    }

    /// Full prefix of every group, root first.
    pub fn group_prefixes(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.prefix.as_str()).collect()
    }

    /// Dispatch one request.
    pub async fn handle_request(&self, ctx: &mut Context) {
        let start = Instant::now();
        ctx.set_service_name(self.service_name.clone());

        let path = ctx.path().to_string();
        let mut chain: Vec<BoxHandler> = self
            .groups
            .iter()
            .filter(|group| path.starts_with(&group.prefix))
            .flat_map(|group| group.middleware.iter().cloned())
            .collect();

        match self.routes.lookup(ctx.method(), &path) {
            Some(matched) => {
                ctx.set_route(matched.pattern, matched.params);
                chain.push(matched.value.clone());
            }
            None => {
                tracing::debug!(method = %ctx.method(), path = %path, "No route");
                ctx.string(StatusCode::NOT_FOUND, format!("NOT FOUND URL {path}"));
            }
        }

        run_chain(&chain, ctx).await;

        metrics::record_request(
            ctx.method().as_str(),
            ctx.status_code().as_u16(),
            ctx.pattern(),
            start,
        );
    }
}

/// Registration handle for one route group.
#[derive(Debug)]
pub struct RouterGroup<'e> {
    engine: &'e mut Engine,
    index: usize,
}

impl<'e> RouterGroup<'e> {
    fn create(engine: &'e mut Engine, parent: usize, prefix: &str) -> Self {
        let prefix = format!("{}{}", engine.groups[parent].prefix, prefix);
        engine.groups.push(Group {
            prefix,
            middleware: Vec::new(),
            parent: Some(parent),
        });
        let index = engine.groups.len() - 1;
        Self { engine, index }
    }

    pub fn prefix(&self) -> &str {
        &self.engine.groups[self.index].prefix
    }

    /// Prefix of the enclosing group; `None` for the root.
    pub fn parent_prefix(&self) -> Option<&str> {
        self.engine.groups[self.index]
            .parent
            .map(|parent| self.engine.groups[parent].prefix.as_str())
    }

    /// Nested group; its prefix extends this group's prefix.
    pub fn group(&mut self, prefix: &str) -> RouterGroup<'_> {
        RouterGroup::create(self.engine, self.index, prefix)
    }

    /// Append middleware applied to every path under this group's prefix.
    pub fn use_middleware(&mut self, handler: impl Handler) -> &mut Self {
        self.engine.groups[self.index]
            .middleware
            .push(Arc::new(handler));
        self
    }

    pub fn handle(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, RouteError> {
        self.add_route(method, pattern, Arc::new(handler))?;
        Ok(self)
    }

    fn add_route(&mut self, method: Method, pattern: &str, handler: BoxHandler) -> Result<(), RouteError> {
        let full = format!("{}{}", self.prefix(), pattern);
        self.engine.routes.insert(method.clone(), &full, handler)?;
        tracing::info!("Route {:>4} - {}", method, full);
        Ok(())
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::DELETE, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::PATCH, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::HEAD, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> Result<&mut Self, RouteError> {
        self.handle(Method::OPTIONS, pattern, handler)
    }

    /// Serve files below `root` at `GET relative/*filepath`.
    pub fn static_files(
        &mut self,
        relative: &str,
        root: impl AsRef<Path>,
    ) -> Result<&mut Self, RouteError> {
        let root = root.as_ref();
        let metadata = std::fs::metadata(root).map_err(|source| RouteError::StaticRoot {
            root: root.display().to_string(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(RouteError::StaticRoot {
                root: root.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let pattern = format!("{}/*filepath", relative.trim_end_matches('/'));
        self.add_route(
            Method::GET,
            &pattern,
            Arc::new(StaticFiles {
                root: root.to_path_buf(),
            }),
        )?;
        Ok(self)
    }
}

/// Endpoint serving files from a directory.
#[derive(Debug)]
struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Resolve a request path below the root, refusing traversal.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = Path::new(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn call(&self, ctx: &mut Context, _next: Next<'_>) -> Flow {
        let requested = ctx.param("filepath").unwrap_or_default().to_string();
        let Some(path) = self.resolve(&requested) else {
            tracing::debug!(path = %ctx.path(), "Rejected static path");
            ctx.string(StatusCode::NOT_FOUND, format!("NOT FOUND URL {}", ctx.path()));
            return Flow::Continue;
        };

        match tokio::fs::read(&path).await {
            Ok(contents) => ctx.data(StatusCode::OK, content_type(&path), contents),
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "Static file unavailable");
                let body = format!("NOT FOUND URL {}", ctx.path());
                ctx.string(StatusCode::NOT_FOUND, body);
            }
        }
        Flow::Continue
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "text/xml; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
