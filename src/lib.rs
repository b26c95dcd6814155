//! Calculator API with a correlated request-observability pipeline.
//!
//! Every inbound request receives a request id, a root span, a
//! trace-correlated logger and access to the shared metric instruments.

pub mod calculator;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
