//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → request id layer (identity issued, X-Request-ID echoed)
//!     → tracing.rs (root span, RequestScope installed)
//!     → logging.rs (completion log + scrape metrics)
//!     → handler
//!         → scope.rs (child spans carried in RequestScope)
//!         → metrics.rs (domain instruments via MetricRegistry)
//!         → errors.rs (span status + error counter + log + failure body)
//!
//! Export:
//!     → telemetry.rs (OTLP traces, metrics, logs)
//!     → /metrics (Prometheus scrape)
//!     → stdout (JSON or pretty)
//! ```
//!
//! # Design Decisions
//! - Request identity and span context travel in one explicit scope value
//! - Every log emitted with a span carries its trace and span ids
//! - Telemetry never fails a request: exporters degrade silently

pub mod errors;
pub mod logging;
pub mod metrics;
pub mod scope;
pub mod telemetry;
pub mod tracing;

#[cfg(test)]
pub(crate) mod testing;
