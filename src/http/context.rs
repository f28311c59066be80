//! Per-request context.
//!
//! # Responsibilities
//! - Expose the inbound request (method, path, headers, body, peer)
//! - Carry route parameters, trace id and the request span
//! - Hold request-scoped values, deadline and cancellation (work context)
//! - Accumulate the single response written for the request
//!
//! # Design Decisions
//! - One `Context` per request, owned by the dispatching task and lent to
//!   every handler as `&mut`. The timeout guard runs downstream on a clone
//!   and adopts it only when it finishes in time
//! - The response is data on the context; it is turned into an HTTP
//!   response exactly once, after the chain finishes
//! - Writing a response again overwrites the previous one (last writer wins)

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{header, request, HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::Span;

use crate::http::chain::Flow;
use crate::routing::Params;

/// Request-scoped key/value store with an optional deadline.
///
/// Clones share the cancellation flag, so work detached onto another task
/// observes a cancel issued by the request task.
#[derive(Debug, Clone, Default)]
pub struct WorkContext {
    values: HashMap<String, Value>,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl WorkContext {
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Tighten the deadline; a later deadline never replaces an earlier one.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
    }

    /// Time left before the deadline, `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Cancelled explicitly or past the deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone)]
struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// State shared by every handler of one request.
#[derive(Debug, Clone)]
pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,

    pattern: Option<String>,
    params: Params,

    trace_id: String,
    trace_header: Option<HeaderName>,
    span: Span,
    service_name: Arc<str>,

    work: WorkContext,
    response: ResponseState,
}

impl Context {
    /// Create a context for a request without headers or body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
            pattern: None,
            params: Params::new(),
            trace_id: String::new(),
            trace_header: None,
            span: Span::none(),
            service_name: Arc::from(""),
            work: WorkContext::default(),
            response: ResponseState::default(),
        }
    }

    /// Create a context from already-split request parts.
    pub fn from_parts(parts: request::Parts, body: Bytes) -> Self {
        let mut ctx = Self::new(parts.method, parts.uri);
        ctx.headers = parts.headers;
        ctx.body = body;
        ctx
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    // --- Request ---

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a request header, if present and valid UTF-8.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First decoded value of a query string parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserialize the request body as JSON.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    // --- Route ---

    /// Bound path parameter, e.g. `id` for `/user/:id`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The matched route pattern, `None` when no route matched.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub(crate) fn set_route(&mut self, pattern: &str, params: Params) {
        self.pattern = Some(pattern.to_string());
        self.params = params;
    }

    // --- Trace ---

    /// Trace id of this request, empty until the trace middleware ran.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub(crate) fn set_trace_id(&mut self, trace_id: String) {
        self.trace_id = trace_id;
    }

    /// Remember which response header echoes the trace id.
    pub(crate) fn set_trace_header(&mut self, name: &str) {
        self.trace_header = HeaderName::try_from(name).ok();
    }

    /// Span bound to the trace id; log through it to correlate events.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub(crate) fn set_service_name(&mut self, name: Arc<str>) {
        self.service_name = name;
    }

    // --- Work context ---

    pub fn work(&self) -> &WorkContext {
        &self.work
    }

    pub fn work_mut(&mut self) -> &mut WorkContext {
        &mut self.work
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.work.set_value(key, value);
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.work.value(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(Value::as_i64)
    }

    pub fn get_float64(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(Value::as_f64)
    }

    /// String elements of an array value; non-string elements are skipped.
    pub fn get_string_slice(&self, key: &str) -> Vec<String> {
        self.value(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_int_slice(&self, key: &str) -> Vec<i64> {
        self.array_of(key, Value::as_i64)
    }

    pub fn get_float64_slice(&self, key: &str) -> Vec<f64> {
        self.array_of(key, Value::as_f64)
    }

    /// Object value as a map. Missing keys and non-object values read empty.
    pub fn get_map_string(&self, key: &str) -> HashMap<String, Value> {
        self.value(key)
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn array_of<T>(&self, key: &str, convert: fn(&Value) -> Option<T>) -> Vec<T> {
        self.value(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(convert).collect())
            .unwrap_or_default()
    }

    /// Deserialize a stored value into `T`. A missing key reads as `null`.
    pub fn unmarshal_key<T: DeserializeOwned>(&self, key: &str) -> Result<T, serde_json::Error> {
        let value = self.value(key).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
    }

    // --- Response ---

    pub fn status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn status_code(&self) -> StatusCode {
        self.response.status
    }

    /// Replace a response header. Invalid header names or values are ignored.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.response.headers.insert(name, value);
        }
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.response.headers.append(name, value);
        }
    }

    /// First value of a response header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    pub fn del_header(&mut self, name: &str) {
        self.response.headers.remove(name);
    }

    pub fn response_body(&self) -> &Bytes {
        &self.response.body
    }

    /// Write a raw body with the given content type.
    pub fn data(&mut self, status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) {
        self.response
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.response.status = status;
        self.response.body = body.into();
    }

    pub fn string(&mut self, status: StatusCode, body: impl Into<String>) {
        self.data(status, "text/plain; charset=utf-8", body.into());
    }

    pub fn html(&mut self, status: StatusCode, body: impl Into<String>) {
        self.data(status, "text/html; charset=utf-8", body.into());
    }

    pub fn xml(&mut self, status: StatusCode, body: impl Into<String>) {
        self.data(status, "text/xml; charset=utf-8", body.into());
    }

    /// Serialize `value` as the JSON body. A serialization failure becomes a
    /// 500 response.
    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => self.data(status, "application/json", body),
            Err(e) => {
                tracing::error!(trace_id = %self.trace_id, error = %e, "Failed to encode JSON response");
                self.data(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "application/json",
                    r#"{"message":"Internal Server Error"}"#,
                );
            }
        }
    }

    /// Write `{"message": message}` and stop the chain.
    pub fn fail(&mut self, status: StatusCode, message: &str) -> Flow {
        self.json(status, &serde_json::json!({ "message": message }));
        Flow::Abort
    }

    /// Discard everything written to the response except the trace header.
    ///
    /// Used before an error response replaces a handler's half-built one.
    pub fn reset_response(&mut self) {
        let trace = self
            .trace_header
            .as_ref()
            .and_then(|name| Some((name.clone(), self.response.headers.get(name)?.clone())));
        self.response = ResponseState::default();
        if let Some((name, value)) = trace {
            self.response.headers.insert(name, value);
        }
    }

    /// Stop the chain without writing a response.
    pub fn abort(&self) -> Flow {
        Flow::Abort
    }

    /// Turn the accumulated response into an HTTP response.
    pub fn into_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.response.body));
        *response.status_mut() = self.response.status;
        *response.headers_mut() = self.response.headers;
        response
    }
}
