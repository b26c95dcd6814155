//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Register named domain instruments once at startup (OTLP push)
//! - Record samples by instrument name from any number of requests
//! - Expose Prometheus-compatible HTTP metrics on `/metrics`
//!
//! # Metrics
//! - `http_requests_total` (counter): total requests by method, path, status
//! - `http_request_duration_seconds` (histogram): latency distribution
//! - domain instruments registered through [`MetricRegistry`]
//!
//! # Design Decisions
//! - Recording is lock-free and local; export runs on the SDK's own
//!   reader thread and never blocks a request
//! - Registration errors are fatal at startup
//! - Histogram buckets tuned for typical web latencies

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry::KeyValue;

const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
const HTTP_DURATION_BUCKETS: [f64; 10] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("instrument name must not be empty in registry {0:?}")]
    EmptyName(&'static str),

    #[error("instrument {0:?} registered twice")]
    Duplicate(&'static str),

    #[error("histogram {0:?} boundaries must be finite and strictly increasing")]
    Boundaries(&'static str),

    #[error("unknown instrument {0:?}")]
    UnknownInstrument(String),

    #[error("instrument {name:?} is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: InstrumentKind,
        actual: InstrumentKind,
    },

    #[error("value {value} is not valid for {kind} {name:?}")]
    InvalidValue {
        name: String,
        kind: InstrumentKind,
        value: f64,
    },

    #[error("prometheus recorder: {0}")]
    Prometheus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    Histogram,
    Gauge,
}

impl std::fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Histogram => "histogram",
            InstrumentKind::Gauge => "gauge",
        })
    }
}

/// Declaration of one instrument to register.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub kind: InstrumentKind,
    /// Explicit bucket boundaries; histograms only.
    pub boundaries: Option<Vec<f64>>,
}

impl InstrumentSpec {
    pub fn counter(name: &'static str, description: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            description,
            unit,
            kind: InstrumentKind::Counter,
            boundaries: None,
        }
    }

    pub fn histogram(
        name: &'static str,
        description: &'static str,
        unit: &'static str,
        boundaries: Vec<f64>,
    ) -> Self {
        Self {
            name,
            description,
            unit,
            kind: InstrumentKind::Histogram,
            boundaries: Some(boundaries),
        }
    }

    pub fn gauge(name: &'static str, description: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            description,
            unit,
            kind: InstrumentKind::Gauge,
            boundaries: None,
        }
    }
}

#[derive(Clone)]
enum Instrument {
    Counter(Counter<u64>),
    Histogram(Histogram<f64>),
    Gauge(Gauge<f64>),
}

impl Instrument {
    fn kind(&self) -> InstrumentKind {
        match self {
            Instrument::Counter(_) => InstrumentKind::Counter,
            Instrument::Histogram(_) => InstrumentKind::Histogram,
            Instrument::Gauge(_) => InstrumentKind::Gauge,
        }
    }
}

/// Process-wide set of named instruments for one domain.
///
/// Cloning shares the instruments. Every recording path is safe for
/// concurrent callers.
#[derive(Clone)]
pub struct MetricRegistry {
    domain: &'static str,
    instruments: Arc<HashMap<&'static str, Instrument>>,
}

impl MetricRegistry {
    /// Create every instrument in `specs` under a meter named `domain`.
    pub fn register<P>(
        provider: &P,
        domain: &'static str,
        specs: &[InstrumentSpec],
    ) -> Result<Self, MetricsError>
    where
        P: MeterProvider,
    {
        let meter = provider.meter(domain);
        let mut instruments = HashMap::with_capacity(specs.len());

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(MetricsError::EmptyName(domain));
            }
            if instruments.contains_key(spec.name) {
                return Err(MetricsError::Duplicate(spec.name));
            }

            let instrument = match spec.kind {
                InstrumentKind::Counter => Instrument::Counter(
                    meter
                        .u64_counter(spec.name)
                        .with_description(spec.description)
                        .with_unit(spec.unit)
                        .build(),
                ),
                InstrumentKind::Histogram => {
                    let mut builder = meter
                        .f64_histogram(spec.name)
                        .with_description(spec.description)
                        .with_unit(spec.unit);
                    if let Some(boundaries) = &spec.boundaries {
                        if !valid_boundaries(boundaries) {
                            return Err(MetricsError::Boundaries(spec.name));
                        }
                        builder = builder.with_boundaries(boundaries.clone());
                    }
                    Instrument::Histogram(builder.build())
                }
                InstrumentKind::Gauge => Instrument::Gauge(
                    meter
                        .f64_gauge(spec.name)
                        .with_description(spec.description)
                        .with_unit(spec.unit)
                        .build(),
                ),
            };
            instruments.insert(spec.name, instrument);
        }

        tracing::debug!(domain, instruments = instruments.len(), "Metric instruments registered");

        Ok(Self {
            domain,
            instruments: Arc::new(instruments),
        })
    }

    pub fn domain(&self) -> &'static str {
        self.domain
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instruments.contains_key(name)
    }

    /// Record `value` against the named instrument. Counters accept
    /// non-negative whole numbers.
    pub fn record(
        &self,
        name: &str,
        value: f64,
        attributes: &[KeyValue],
    ) -> Result<(), MetricsError> {
        let instrument = self.get(name)?;
        if !value.is_finite() {
            return Err(MetricsError::InvalidValue {
                name: name.to_owned(),
                kind: instrument.kind(),
                value,
            });
        }
        match instrument {
            Instrument::Counter(counter) => {
                if value < 0.0 || value.fract() != 0.0 {
                    return Err(MetricsError::InvalidValue {
                        name: name.to_owned(),
                        kind: InstrumentKind::Counter,
                        value,
                    });
                }
                counter.add(value as u64, attributes);
            }
            Instrument::Histogram(histogram) => histogram.record(value, attributes),
            Instrument::Gauge(gauge) => gauge.record(value, attributes),
        }
        Ok(())
    }

    pub fn counter(&self, name: &str) -> Result<Counter<u64>, MetricsError> {
        match self.get(name)? {
            Instrument::Counter(c) => Ok(c.clone()),
            other => Err(self.mismatch(name, InstrumentKind::Counter, other)),
        }
    }

    pub fn histogram(&self, name: &str) -> Result<Histogram<f64>, MetricsError> {
        match self.get(name)? {
            Instrument::Histogram(h) => Ok(h.clone()),
            other => Err(self.mismatch(name, InstrumentKind::Histogram, other)),
        }
    }

    pub fn gauge(&self, name: &str) -> Result<Gauge<f64>, MetricsError> {
        match self.get(name)? {
            Instrument::Gauge(g) => Ok(g.clone()),
            other => Err(self.mismatch(name, InstrumentKind::Gauge, other)),
        }
    }

    fn get(&self, name: &str) -> Result<&Instrument, MetricsError> {
        self.instruments
            .get(name)
            .ok_or_else(|| MetricsError::UnknownInstrument(name.to_owned()))
    }

    fn mismatch(&self, name: &str, expected: InstrumentKind, actual: &Instrument) -> MetricsError {
        MetricsError::KindMismatch {
            name: name.to_owned(),
            expected,
            actual: actual.kind(),
        }
    }
}

fn valid_boundaries(boundaries: &[f64]) -> bool {
    boundaries.iter().all(|b| b.is_finite()) && boundaries.windows(2).all(|w| w[0] < w[1])
}

/// Install the Prometheus recorder behind the `metrics` facade. The
/// recorder is process-global, so repeated calls share one handle.
pub fn install_prometheus() -> Result<PrometheusHandle, MetricsError> {
    static HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

    HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full(HTTP_REQUEST_DURATION.to_string()),
                    &HTTP_DURATION_BUCKETS,
                )
                .map_err(|e| e.to_string())?
                .install_recorder()
                .map_err(|e| e.to_string())?;

            metrics::describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests handled");
            metrics::describe_histogram!(
                HTTP_REQUEST_DURATION,
                metrics::Unit::Seconds,
                "HTTP request latency"
            );
            Ok(handle)
        })
        .clone()
        .map_err(MetricsError::Prometheus)
}

/// Record one completed HTTP request.
pub fn record_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_owned(),
        "path" => path.to_owned(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        HTTP_REQUEST_DURATION,
        "method" => method.to_owned(),
        "path" => path.to_owned()
    )
    .record(elapsed.as_secs_f64());
}
