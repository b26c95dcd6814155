//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with every handler
//! - Wire up middleware (request ID, timeout, span, completion log, limits)
//! - Serve on a listener until shutdown is signalled
//!
//! # Middleware order (outermost first)
//! ```text
//! RequestIdLayer → trace_requests → log_requests → timeout → handler
//! ```
//! The request ID exists before the root span opens, and the completion
//! log runs inside the root span so it carries the trace identity. The
//! timeout sits inside both, so an expired request still gets a failure
//! body, a completion log and a finished root span.

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{BoxError, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::trace::Status;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::timeout::error::Elapsed;
use tower::ServiceBuilder;

use crate::calculator::{self, CalculatorState};
use crate::config::ServiceConfig;
use crate::http::request::RequestIdLayer;
use crate::http::response::write_failure_response;
use crate::observability::logging::{log_requests, logger_for};
use crate::observability::scope::RequestScope;
use crate::observability::tracing::trace_requests;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub calculator: CalculatorState,
    /// `None` when Prometheus exposition is disabled.
    pub prometheus: Option<PrometheusHandle>,
}

/// HTTP server for the calculator API.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
}

impl HttpServer {
    pub fn new(config: ServiceConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServiceConfig, state: AppState) -> Router {
        let spans = state.calculator.spans.clone();
        let request_timeout = Duration::from_secs(config.timeouts.request_secs);

        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(render_metrics))
            .with_state(state.prometheus)
            .nest("/calculator", calculator::routes(state.calculator))
            .fallback(not_found)
            .method_not_allowed_fallback(method_not_allowed)
            .layer(DefaultBodyLimit::max(config.limits.max_body_bytes))
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_middleware_error))
                    .timeout(request_timeout),
            )
            .layer(middleware::from_fn(log_requests))
            .layer(middleware::from_fn_with_state(spans, trace_requests))
            .layer(RequestIdLayer)
    }

    /// The assembled router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight
    /// requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.config.observability.service_name,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found(scope: RequestScope) -> Response {
    write_failure_response(StatusCode::NOT_FOUND, "not found", scope.request_id())
}

async fn method_not_allowed(scope: RequestScope) -> Response {
    write_failure_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "method not allowed",
        scope.request_id(),
    )
}

/// Turn errors from the timeout layer into failure responses. The handler
/// future has been dropped at this point, so the root span is marked here.
async fn handle_middleware_error(scope: RequestScope, err: BoxError) -> Response {
    let (status, message) = if err.is::<Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timeout")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    };

    scope.span().set_status(Status::error(message));
    let logger = logger_for(&scope);
    crate::log_warn!(
        logger,
        request_id = %scope.request_id(),
        error = %err,
        status = status.as_u16(),
        "request aborted"
    );
    write_failure_response(status, message, scope.request_id())
}

async fn render_metrics(State(handle): State<Option<PrometheusHandle>>) -> Response {
    let body = handle.map(|h| h.render()).unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
