//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Telemetry providers → Subscriber
//!         → Instruments → Prometheus recorder → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain requests
//!         → Flush telemetry (bounded) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, before the listener binds
//! - Telemetry flush has a deadline: unsent data is dropped, not waited on

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
