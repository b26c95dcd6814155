//! Response writing.
//!
//! # Responsibilities
//! - Serialize success bodies as JSON
//! - Write the standardized failure body `{"error", "request_id"}`
//!
//! # Design Decisions
//! - Failure bodies never carry causes or stack traces
//! - `X-Request-ID` is added by the request ID layer, not here

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::http::request::RequestId;

/// Body of every failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub request_id: String,
}

/// Write the failure response. Callers that already recorded the failure
/// on their spans use this directly; everyone else goes through
/// [`record_error`](crate::observability::errors::record_error).
pub fn write_failure_response(status: StatusCode, message: &str, request_id: &RequestId) -> Response {
    let body = ErrorBody {
        error: message.to_owned(),
        request_id: request_id.to_string(),
    };
    (status, Json(body)).into_response()
}

/// Write a `200 OK` JSON body.
pub fn write_json<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}
