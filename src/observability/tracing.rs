//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract W3C trace context from incoming requests
//! - Open one root span per request, except on untraced paths
//! - Open child spans for handler work
//! - Inject trace context into outbound requests
//!
//! # Design Decisions
//! - Spans never fail a request: the SDK degrades to non-recording spans
//! - The propagator is owned by the manager rather than installed globally
//! - Root spans are ended exactly once, after the response is produced

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::HttpBody;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanKind, Status, Tracer};
use opentelemetry::KeyValue;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracer;

use crate::http::request::RequestIdExt;
use crate::observability::scope::RequestScope;

/// Name of every request's root span.
pub const ROOT_SPAN_NAME: &str = "http_request";

/// Creates root and child spans for request scopes.
#[derive(Clone)]
pub struct SpanManager {
    tracer: SdkTracer,
    propagator: Arc<TraceContextPropagator>,
    untraced: Arc<HashSet<String>>,
}

impl SpanManager {
    pub fn new<I>(tracer: SdkTracer, untraced_paths: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            tracer,
            propagator: Arc::new(TraceContextPropagator::new()),
            untraced: Arc::new(untraced_paths.into_iter().collect()),
        }
    }

    /// Whether requests to `path` get a root span.
    pub fn should_trace(&self, path: &str) -> bool {
        !self.untraced.contains(path)
    }

    /// Open the root span for a request. The inbound `traceparent`, if
    /// any, becomes its remote parent.
    pub fn start_root_span(
        &self,
        scope: &RequestScope,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> RequestScope {
        let parent = self.propagator.extract(&HeaderExtractor(headers));
        let span = self
            .tracer
            .span_builder(ROOT_SPAN_NAME)
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("http.request.method", method.as_str().to_owned()),
                KeyValue::new("url.path", path.to_owned()),
                KeyValue::new("request.id", scope.request_id().to_string()),
            ])
            .start_with_context(&self.tracer, &parent);

        scope.with_context(parent).with_span(span)
    }

    /// Record response details on the root span and end it.
    pub fn finish_root_span(
        &self,
        scope: &RequestScope,
        status: StatusCode,
        elapsed: Duration,
        body_size: Option<u64>,
    ) {
        let span = scope.span();
        span.set_attribute(KeyValue::new(
            "http.response.status_code",
            i64::from(status.as_u16()),
        ));
        span.set_attribute(KeyValue::new(
            "http.server.duration_ms",
            elapsed.as_secs_f64() * 1000.0,
        ));
        if let Some(size) = body_size.and_then(|s| i64::try_from(s).ok()) {
            span.set_attribute(KeyValue::new("http.response.body.size", size));
        }
        if status.is_server_error() {
            span.set_status(Status::error(format!("HTTP {}", status.as_u16())));
        }
        span.end();
    }

    /// Open a child span under the scope's active span and return the
    /// scope in which it is active. The span itself is reached through
    /// [`RequestScope::span`] on the returned scope.
    pub fn start_child_span(
        &self,
        scope: &RequestScope,
        name: impl Into<Cow<'static, str>>,
        attributes: Vec<KeyValue>,
    ) -> RequestScope {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(SpanKind::Internal)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, scope.context());
        scope.with_span(span)
    }

    /// Write `traceparent`/`tracestate` for the scope's active span.
    pub fn inject_trace_context(&self, scope: &RequestScope, headers: &mut HeaderMap) {
        self.propagator
            .inject_context(scope.context(), &mut HeaderInjector(headers));
    }
}

/// Middleware opening the root span. Expects the request id to already be
/// issued; installs the [`RequestScope`] for everything inside it.
pub async fn trace_requests(
    State(spans): State<SpanManager>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req.request_id().cloned().unwrap_or_default();
    let scope = RequestScope::new(request_id);
    let path = req.uri().path().to_owned();

    if !spans.should_trace(&path) {
        req.extensions_mut().insert(scope);
        return next.run(req).await;
    }

    let start = Instant::now();
    let scope = spans.start_root_span(&scope, req.method(), &path, req.headers());
    req.extensions_mut().insert(scope.clone());

    let response = next.run(req).await;

    spans.finish_root_span(
        &scope,
        response.status(),
        start.elapsed(),
        response.body().size_hint().exact(),
    );
    response
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}
