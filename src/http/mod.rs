//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware order)
//!     → request.rs (issue request ID, echo X-Request-ID)
//!     → observability middleware (root span, completion log)
//!     → calculator handlers
//!     → response.rs (JSON success / failure bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ServerError};
