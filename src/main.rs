//! Calculator API server.
//!
//! ```text
//!   Client ──▶ request id ──▶ root span ──▶ completion log ──▶ timeout ──▶ calculator
//!                                 │                │                            │
//!                                 ▼                ▼                            ▼
//!                               ┌─────────────────────────────────────────────┐
//!                               │ OTLP traces · OTLP logs · OTLP metrics      │
//!                               │ stdout JSON · /metrics Prometheus scrape     │
//!                               └─────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use calculator_api::calculator::{CalculatorMetrics, CalculatorState};
use calculator_api::config::validation::validate_config;
use calculator_api::config::{load_config, ConfigError};
use calculator_api::http::{AppState, HttpServer};
use calculator_api::lifecycle::signals::shutdown_on_signal;
use calculator_api::lifecycle::Shutdown;
use calculator_api::observability::logging::init_subscriber;
use calculator_api::observability::metrics::install_prometheus;
use calculator_api::observability::telemetry::TelemetryProviders;
use calculator_api::observability::tracing::SpanManager;

#[derive(Debug, Parser)]
#[command(name = "calculator-api", version, about = "Calculator API with OpenTelemetry")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "CALCULATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }

    let providers = TelemetryProviders::init(&config.observability)?;
    init_subscriber(config.observability.log_format, providers.logger_provider())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.observability.service_name,
        otlp_endpoint = config.observability.otlp_endpoint.as_deref().unwrap_or("disabled"),
        "calculator-api starting"
    );

    let spans = SpanManager::new(
        providers.tracer(),
        config.observability.untraced_paths.iter().cloned(),
    );
    let metrics = CalculatorMetrics::register(providers.meter_provider())?;
    let prometheus = if config.observability.metrics_enabled {
        Some(install_prometheus()?)
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        request_timeout_secs = config.timeouts.request_secs,
        max_body_bytes = config.limits.max_body_bytes,
        "Listening for connections"
    );

    let shutdown_timeout = Duration::from_secs(config.timeouts.shutdown_secs);
    let shutdown = Shutdown::new();
    let server = HttpServer::new(
        config,
        AppState {
            calculator: CalculatorState { spans, metrics },
            prometheus,
        },
    );
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    shutdown_on_signal(&shutdown).await;
    let served = server_task.await?;

    providers.shutdown(shutdown_timeout).await;
    tracing::info!("Shutdown complete");

    served.map_err(Into::into)
}
