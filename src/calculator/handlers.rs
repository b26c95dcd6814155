//! Single-operation endpoints.

use std::error::Error;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use opentelemetry::trace::Status;
use opentelemetry::KeyValue;
use serde::de::DeserializeOwned;

use super::ops::Operator;
use super::types::{CalcRequest, CalcResponse};
use super::{CalcError, CalculatorState};
use crate::http::response::write_json;
use crate::observability::errors::{record_error, Failure};
use crate::observability::logging::logger_for;
use crate::observability::scope::RequestScope;

/// Why a body could not be turned into a request.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BodyError {
    #[error("failed to read body: {0}")]
    Read(#[from] BytesRejection),

    #[error("failed to decode body: {0}")]
    Decode(#[from] serde_json::Error),
}

pub(crate) fn parse_body<T: DeserializeOwned>(
    body: Result<Bytes, BytesRejection>,
) -> Result<T, BodyError> {
    Ok(serde_json::from_slice(&body?)?)
}

/// Report a request-level failure through the error recorder.
pub(crate) fn reject(
    state: &CalculatorState,
    scope: &RequestScope,
    operation: &str,
    error: &CalcError,
    cause: &(dyn Error + 'static),
) -> Response {
    record_error(
        scope,
        &logger_for(scope),
        state.metrics.errors(),
        Failure {
            operation,
            message: &error.to_string(),
            cause,
            status: StatusCode::BAD_REQUEST,
        },
    )
}

pub async fn add(
    State(state): State<CalculatorState>,
    scope: RequestScope,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    binary_operation(&state, &scope, Operator::Add, body)
}

pub async fn subtract(
    State(state): State<CalculatorState>,
    scope: RequestScope,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    binary_operation(&state, &scope, Operator::Subtract, body)
}

pub async fn multiply(
    State(state): State<CalculatorState>,
    scope: RequestScope,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    binary_operation(&state, &scope, Operator::Multiply, body)
}

pub async fn divide(
    State(state): State<CalculatorState>,
    scope: RequestScope,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    binary_operation(&state, &scope, Operator::Divide, body)
}

fn binary_operation(
    state: &CalculatorState,
    parent: &RequestScope,
    op: Operator,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let scope = state.spans.start_child_span(
        parent,
        format!("calculator.{op}"),
        vec![
            KeyValue::new("calculator.operation", op.as_str()),
            KeyValue::new("request.id", parent.request_id().to_string()),
        ],
    );
    let response = compute(state, &scope, op, body);
    scope.span().end();
    response
}

fn compute(
    state: &CalculatorState,
    scope: &RequestScope,
    op: Operator,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    match parse_body(body) {
        Ok(req) => compute_values(state, scope, op, req),
        Err(e) => reject(state, scope, op.as_str(), &CalcError::InvalidBody, &e),
    }
}

/// Apply `op` to decoded operands inside the operation's child span.
fn compute_values(
    state: &CalculatorState,
    scope: &RequestScope,
    op: Operator,
    CalcRequest { a, b }: CalcRequest,
) -> Response {
    if !a.is_finite() || !b.is_finite() {
        let error = CalcError::NonFinite { a, b };
        return reject(state, scope, op.as_str(), &error, &error);
    }

    let span = scope.span();
    span.set_attribute(KeyValue::new("calculator.a", a));
    span.set_attribute(KeyValue::new("calculator.b", b));

    let start = Instant::now();
    let Some(result) = op.apply(a, b) else {
        let error = CalcError::DivisionByZero { a, b };
        return reject(state, scope, op.as_str(), &error, &error);
    };
    if !result.is_finite() {
        let error = CalcError::OutOfRange { a, b };
        return reject(state, scope, op.as_str(), &error, &error);
    }
    let elapsed = start.elapsed();
    let duration_ms = elapsed.as_secs_f64() * 1000.0;

    state.metrics.record_success(op.as_str(), elapsed);
    state.metrics.record_result(op.as_str(), result);

    span.set_attribute(KeyValue::new("calculator.result", result));
    span.add_event(
        "computation.complete",
        vec![
            KeyValue::new("result", result),
            KeyValue::new("duration_ms", duration_ms),
        ],
    );
    span.set_status(Status::Ok);

    crate::log_info!(
        logger_for(scope),
        operation = op.as_str(),
        a,
        b,
        result,
        duration_ms,
        request_id = %scope.request_id(),
        "calculator operation completed"
    );

    write_json(CalcResponse {
        operation: op.as_str().to_owned(),
        a,
        b,
        result,
        request_id: scope.request_id().to_string(),
    })
}
