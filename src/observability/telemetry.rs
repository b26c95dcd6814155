//! OpenTelemetry provider setup and shutdown.
//!
//! Providers are built once at startup from [`ObservabilityConfig`] and
//! handed to the components that need them. With no OTLP endpoint the
//! tracer and meter providers still produce valid spans and instruments,
//! they just have nowhere to export to.

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{
    ExporterBuildError, LogExporter, MetricExporter, SpanExporter, WithExportConfig,
    WithHttpConfig,
};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;

use crate::config::ObservabilityConfig;
use crate::observability::metrics::MetricsError;

const TRACER_NAME: &str = "calculator-api";

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP {signal} exporter: {source}")]
    Exporter {
        signal: &'static str,
        #[source]
        source: ExporterBuildError,
    },

    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Owned tracer, meter and logger providers.
pub struct TelemetryProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: Option<SdkLoggerProvider>,
}

impl TelemetryProviders {
    /// Build providers for `config`. Any exporter failure is fatal.
    pub fn init(config: &ObservabilityConfig) -> Result<Self, TelemetryError> {
        let resource = build_resource(config);

        let Some(endpoint) = config.otlp_endpoint.as_deref() else {
            return Ok(Self {
                tracer: SdkTracerProvider::builder().with_resource(resource.clone()).build(),
                meter: SdkMeterProvider::builder().with_resource(resource).build(),
                logger: None,
            });
        };
        let endpoint = endpoint.trim_end_matches('/');
        let headers: HashMap<String, String> = config
            .otlp_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let span_exporter = SpanExporter::builder()
            .with_http()
            .with_endpoint(format!("{endpoint}/v1/traces"))
            .with_headers(headers.clone())
            .build()
            .map_err(|source| TelemetryError::Exporter { signal: "trace", source })?;

        let metric_exporter = MetricExporter::builder()
            .with_http()
            .with_endpoint(format!("{endpoint}/v1/metrics"))
            .with_headers(headers.clone())
            .build()
            .map_err(|source| TelemetryError::Exporter { signal: "metric", source })?;

        let log_exporter = LogExporter::builder()
            .with_http()
            .with_endpoint(format!("{endpoint}/v1/logs"))
            .with_headers(headers)
            .build()
            .map_err(|source| TelemetryError::Exporter { signal: "log", source })?;

        Ok(Self {
            tracer: SdkTracerProvider::builder()
                .with_resource(resource.clone())
                .with_batch_exporter(span_exporter)
                .build(),
            meter: SdkMeterProvider::builder()
                .with_resource(resource.clone())
                .with_reader(PeriodicReader::builder(metric_exporter).build())
                .build(),
            logger: Some(
                SdkLoggerProvider::builder()
                    .with_resource(resource)
                    .with_batch_exporter(log_exporter)
                    .build(),
            ),
        })
    }

    pub fn tracer(&self) -> SdkTracer {
        self.tracer.tracer(TRACER_NAME)
    }

    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter
    }

    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logger.as_ref()
    }

    /// Flush and shut down every provider. Each one gets at most `timeout`;
    /// anything not exported by then is dropped.
    pub async fn shutdown(self, timeout: Duration) {
        let Self { tracer, meter, logger } = self;

        shutdown_bounded("trace", timeout, move || tracer.shutdown()).await;
        shutdown_bounded("metric", timeout, move || meter.shutdown()).await;
        if let Some(logger) = logger {
            shutdown_bounded("log", timeout, move || logger.shutdown()).await;
        }
    }
}

fn build_resource(config: &ObservabilityConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attributes(
            config
                .resource_attributes
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
        )
        .build()
}

async fn shutdown_bounded<F, E>(signal: &'static str, timeout: Duration, shutdown: F)
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Display + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(shutdown)).await {
        Ok(Ok(Ok(()))) => tracing::debug!(signal, "Telemetry provider shut down"),
        Ok(Ok(Err(e))) => tracing::warn!(signal, error = %e, "Telemetry provider shutdown failed"),
        Ok(Err(e)) => tracing::warn!(signal, error = %e, "Telemetry shutdown task panicked"),
        Err(_) => tracing::warn!(
            signal,
            timeout_ms = timeout.as_millis() as u64,
            "Telemetry shutdown timed out, abandoning pending export"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_providers_without_endpoint() {
        let providers = TelemetryProviders::init(&ObservabilityConfig::default()).unwrap();
        assert!(providers.logger_provider().is_none());

        use opentelemetry::trace::{Span as _, Tracer as _};
        let mut span = providers.tracer().start("startup-check");
        assert!(span.span_context().is_valid());
        span.end();

        providers.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_is_bounded() {
        let start = std::time::Instant::now();
        shutdown_bounded("slow", Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok::<(), String>(())
        })
        .await;
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_providers_with_endpoint_build() {
        let mut config = ObservabilityConfig::default();
        config.otlp_endpoint = Some("http://127.0.0.1:4318/".into());
        config.otlp_headers.insert("authorization".into(), "Bearer t".into());

        let providers = TelemetryProviders::init(&config).unwrap();
        assert!(providers.logger_provider().is_some());
        providers.shutdown(Duration::from_millis(200)).await;
    }
}
