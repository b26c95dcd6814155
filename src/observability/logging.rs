//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber (console + optional OTLP bridge)
//! - Derive trace-correlated loggers from a request scope
//! - Emit the per-request completion log
//!
//! # Design Decisions
//! - JSON console format for production, pretty format for development
//! - A correlated logger writes `trace_id`/`span_id` fields for humans and
//!   attaches the scope's OpenTelemetry context while the event is emitted,
//!   so the OTLP log record carries the span's native trace identity
//! - Without a valid span the plain base logger is returned

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::Context;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogFormat;
use crate::http::request::RequestIdExt;
use crate::observability::metrics;
use crate::observability::scope::RequestScope;
use crate::observability::telemetry::TelemetryError;

const DEFAULT_DIRECTIVES: &str = "calculator_api=info";
const BRIDGE_DIRECTIVES: &str =
    "info,hyper=off,h2=off,reqwest=off,opentelemetry=off,opentelemetry_sdk=off,opentelemetry_otlp=off";

/// Logger handed to request code.
///
/// Emit through [`log_info!`](crate::log_info), [`log_warn!`](crate::log_warn)
/// and [`log_error!`](crate::log_error).
#[derive(Debug, Clone, Default)]
pub struct Logger {
    correlation: Option<Correlation>,
}

#[derive(Debug, Clone)]
struct Correlation {
    trace_id: String,
    span_id: String,
    cx: Context,
}

impl Logger {
    /// The uncorrelated base logger.
    pub fn base() -> Self {
        Self::default()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.correlation.as_ref().map(|c| c.trace_id.as_str())
    }

    pub fn span_id(&self) -> Option<&str> {
        self.correlation.as_ref().map(|c| c.span_id.as_str())
    }

    /// Run `emit` with the logger's trace context attached. `emit` receives
    /// the human-readable `(trace_id, span_id)` when correlated.
    #[doc(hidden)]
    pub fn emit<R>(&self, emit: impl FnOnce(Option<(&str, &str)>) -> R) -> R {
        match &self.correlation {
            Some(c) => {
                let _guard = c.cx.clone().attach();
                emit(Some((c.trace_id.as_str(), c.span_id.as_str())))
            }
            None => emit(None),
        }
    }
}

/// Derive a logger for `scope`. Correlated when the scope holds a valid span.
pub fn logger_for(scope: &RequestScope) -> Logger {
    match scope.span_context() {
        Some(sc) => Logger {
            correlation: Some(Correlation {
                trace_id: sc.trace_id().to_string(),
                span_id: sc.span_id().to_string(),
                cx: scope.context().clone(),
            }),
        },
        None => Logger::base(),
    }
}

/// Emit an event through a [`Logger`] at the given level.
#[macro_export]
macro_rules! log_event {
    ($level:expr, $logger:expr, $($arg:tt)+) => {
        $logger.emit(|ids| match ids {
            Some((trace_id, span_id)) => {
                ::tracing::event!($level, trace_id = %trace_id, span_id = %span_id, $($arg)+)
            }
            None => ::tracing::event!($level, $($arg)+),
        })
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_event!(::tracing::Level::INFO, $logger, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_event!(::tracing::Level::WARN, $logger, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $crate::log_event!(::tracing::Level::ERROR, $logger, $($arg)+)
    };
}

/// Middleware writing one completion log per request and recording the
/// scrape metrics. Runs inside the span middleware.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let scope = match req.extensions().get::<RequestScope>() {
        Some(scope) => scope.clone(),
        None => RequestScope::new(req.request_id().cloned().unwrap_or_default()),
    };
    let logger = logger_for(&scope);
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    metrics::record_request(method.as_str(), &route, status, elapsed);

    crate::log_info!(
        logger,
        method = %method,
        path = %path,
        status,
        request_id = %scope.request_id(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "request completed"
    );

    response
}

/// Install the global subscriber: env filter, console formatter and, when
/// an OTLP log provider exists, the OpenTelemetry log bridge.
pub fn init_subscriber(
    format: LogFormat,
    logger_provider: Option<&SdkLoggerProvider>,
) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    // The exporter's own crates must not feed back into the OTLP pipeline.
    let otel_layer = logger_provider.map(|provider| {
        OpenTelemetryTracingBridge::new(provider).with_filter(EnvFilter::new(BRIDGE_DIRECTIVES))
    });

    let (json_layer, pretty_layer) = match format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_span_list(false),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}
