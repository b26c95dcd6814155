//! Calculator instruments.

use std::time::Duration;

use opentelemetry::metrics::{Counter, MeterProvider};
use opentelemetry::KeyValue;

use crate::observability::metrics::{InstrumentSpec, MetricRegistry, MetricsError};

pub const DOMAIN: &str = "calculator";

pub const OPERATIONS_TOTAL: &str = "calculator.operations.total";
pub const OPERATION_DURATION: &str = "calculator.operation.duration";
pub const ERRORS_TOTAL: &str = "calculator.errors.total";
pub const LAST_RESULT: &str = "calculator.last_result";

const DURATION_BUCKETS_MS: [f64; 7] = [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

fn instruments() -> Vec<InstrumentSpec> {
    vec![
        InstrumentSpec::counter(
            OPERATIONS_TOTAL,
            "Total number of calculator operations",
            "{operation}",
        ),
        InstrumentSpec::histogram(
            OPERATION_DURATION,
            "Duration of calculator operations",
            "ms",
            DURATION_BUCKETS_MS.to_vec(),
        ),
        InstrumentSpec::counter(
            ERRORS_TOTAL,
            "Total number of calculator errors",
            "{error}",
        ),
        InstrumentSpec::gauge(LAST_RESULT, "Last calculation result", "1"),
    ]
}

/// Handles to the calculator instruments, shared by every handler.
#[derive(Clone)]
pub struct CalculatorMetrics {
    registry: MetricRegistry,
    errors: Counter<u64>,
}

impl CalculatorMetrics {
    pub fn register<P: MeterProvider>(provider: &P) -> Result<Self, MetricsError> {
        let registry = MetricRegistry::register(provider, DOMAIN, &instruments())?;
        let errors = registry.counter(ERRORS_TOTAL)?;
        Ok(Self { registry, errors })
    }

    /// Error counter, for the error recorder.
    pub fn errors(&self) -> &Counter<u64> {
        &self.errors
    }

    /// Count one successful operation and its duration.
    pub fn record_success(&self, operation: &str, elapsed: Duration) {
        let attrs = [KeyValue::new("operation", operation.to_owned())];
        self.record(OPERATIONS_TOTAL, 1.0, &attrs);
        self.record(OPERATION_DURATION, elapsed.as_secs_f64() * 1000.0, &attrs);
    }

    pub fn record_result(&self, operation: &str, result: f64) {
        self.record(
            LAST_RESULT,
            result,
            &[KeyValue::new("operation", operation.to_owned())],
        );
    }

    // Every name is registered above and every value comes from a
    // successful computation, so a rejected sample is only logged.
    fn record(&self, name: &str, value: f64, attrs: &[KeyValue]) {
        if let Err(e) = self.registry.record(name, value, attrs) {
            tracing::debug!(error = %e, "Dropped calculator metric sample");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

    fn provider() -> (SdkMeterProvider, InMemoryMetricExporter) {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(exporter.clone()).build())
            .build();
        (provider, exporter)
    }

    #[test]
    fn test_register_creates_all_instruments() {
        let (provider, _) = provider();
        let metrics = CalculatorMetrics::register(&provider).unwrap();
        for name in [OPERATIONS_TOTAL, OPERATION_DURATION, ERRORS_TOTAL, LAST_RESULT] {
            assert!(metrics.registry.contains(name), "{name} missing");
        }
        assert_eq!(metrics.registry.domain(), DOMAIN);
    }

    #[test]
    fn test_samples_are_exported() {
        let (provider, exporter) = provider();
        let metrics = CalculatorMetrics::register(&provider).unwrap();

        metrics.record_success("add", Duration::from_micros(40));
        metrics.record_success("add", Duration::from_micros(60));
        metrics.record_result("add", 15.0);
        metrics.errors().add(1, &[KeyValue::new("operation", "divide")]);
        provider.force_flush().unwrap();

        assert!(!exporter.get_finished_metrics().unwrap().is_empty());
    }

    #[test]
    fn test_non_finite_result_is_dropped_not_panicking() {
        let (provider, _) = provider();
        let metrics = CalculatorMetrics::register(&provider).unwrap();
        metrics.record_result("multiply", f64::INFINITY);
    }
}
