//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the calculator service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Upper bound for draining each telemetry exporter on shutdown.
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 5,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Console log rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name reported on every span, log record and metric.
    pub service_name: String,

    /// OTLP/HTTP collector base endpoint. Export is disabled when unset.
    pub otlp_endpoint: Option<String>,

    /// Extra headers sent with every OTLP export (e.g. auth).
    pub otlp_headers: BTreeMap<String, String>,

    /// Extra resource attributes attached to all telemetry.
    pub resource_attributes: BTreeMap<String, String>,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Console log format.
    pub log_format: LogFormat,

    /// Paths that never get a root span (still get request id and logging).
    pub untraced_paths: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "calculator-api".to_string(),
            otlp_endpoint: None,
            otlp_headers: BTreeMap::new(),
            resource_attributes: BTreeMap::new(),
            metrics_enabled: true,
            log_format: LogFormat::Json,
            untraced_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}
