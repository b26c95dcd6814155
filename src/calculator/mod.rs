//! Calculator API.
//!
//! # Data Flow
//! ```text
//! POST /calculator/{add,subtract,multiply,divide}
//!     → handlers.rs (decode → validate → ops.rs → metrics.rs → response)
//!
//! POST /calculator/chain
//!     → chain.rs (decode → one child span per step → response)
//! ```
//!
//! # Design Decisions
//! - Every failure is a client error (400) with its own message
//! - Operands and results are `f64`; non-finite operands and results are
//!   rejected
//! - A missing operand reads as zero

pub mod chain;
pub mod handlers;
pub mod metrics;
pub mod ops;
pub mod types;

use axum::routing::post;
use axum::Router;

use crate::observability::tracing::SpanManager;
pub use self::metrics::CalculatorMetrics;

/// Shared handler state: span manager and instrument handles.
#[derive(Clone)]
pub struct CalculatorState {
    pub spans: SpanManager,
    pub metrics: CalculatorMetrics,
}

/// Client-visible calculator failures. The display text is the message
/// returned in the failure body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("invalid request body")]
    InvalidBody,

    #[error("invalid numeric input")]
    NonFinite { a: f64, b: f64 },

    #[error("no steps provided")]
    EmptyChain,

    #[error("division by zero: {a} / {b}")]
    DivisionByZero { a: f64, b: f64 },

    #[error("division by zero at step {step}")]
    DivisionByZeroAtStep { step: usize },

    #[error("unknown operation {op:?} at step {step}")]
    UnknownOperation { op: String, step: usize },

    #[error("result out of range")]
    OutOfRange { a: f64, b: f64 },

    #[error("result out of range at step {step}")]
    OutOfRangeAtStep { step: usize },
}

/// Calculator routes, relative to their mount point.
pub fn routes(state: CalculatorState) -> Router {
    Router::new()
        .route("/add", post(handlers::add))
        .route("/subtract", post(handlers::subtract))
        .route("/multiply", post(handlers::multiply))
        .route("/divide", post(handlers::divide))
        .route("/chain", post(chain::chain))
        .with_state(state)
}
