//! Unified error recording.
//!
//! One call turns a request-scoped failure into: an error status on the
//! active span, an error counter increment, one correlated error log and
//! the JSON failure response. Call it at most once per failure. Code that
//! marks several spans itself should finish with
//! [`write_failure_response`] instead.

use std::error::Error;

use axum::http::StatusCode;
use axum::response::Response;
use opentelemetry::metrics::Counter;
use opentelemetry::trace::Status;
use opentelemetry::KeyValue;

use crate::http::response::write_failure_response;
use crate::observability::logging::Logger;
use crate::observability::scope::RequestScope;

/// What failed and how to report it.
#[derive(Debug, Clone, Copy)]
pub struct Failure<'a> {
    /// Operation tag for the error counter and log.
    pub operation: &'a str,
    /// Client-visible message.
    pub message: &'a str,
    /// Internal cause; logged and recorded on the span, never returned.
    pub cause: &'a (dyn Error + 'static),
    pub status: StatusCode,
}

/// Record `failure` against the scope's active span, `errors` and `logger`,
/// then build the failure response.
pub fn record_error(
    scope: &RequestScope,
    logger: &Logger,
    errors: &Counter<u64>,
    failure: Failure<'_>,
) -> Response {
    let span = scope.span();
    span.record_error(failure.cause);
    span.set_status(Status::error(failure.message.to_owned()));

    errors.add(1, &[KeyValue::new("operation", failure.operation.to_owned())]);

    crate::log_error!(
        logger,
        operation = %failure.operation,
        error = %failure.cause,
        request_id = %scope.request_id(),
        "{}",
        failure.message
    );

    write_failure_response(failure.status, failure.message, scope.request_id())
}
