//! Shared utilities for integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::fmt::MakeWriter;

use calculator_api::calculator::{CalculatorMetrics, CalculatorState};
use calculator_api::http::{AppState, HttpServer, ServerError};
use calculator_api::lifecycle::Shutdown;
use calculator_api::observability::metrics::install_prometheus;
use calculator_api::observability::tracing::SpanManager;
use calculator_api::ServiceConfig;

/// A server running on an ephemeral port with in-memory span export.
pub struct TestServer {
    pub addr: SocketAddr,
    spans: InMemorySpanExporter,
    _provider: SdkTracerProvider,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().unwrap_or_default()
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Start the full router on `127.0.0.1:0`.
pub async fn start_server() -> TestServer {
    start_server_with(ServiceConfig::default()).await
}

/// Start the full router on `127.0.0.1:0` with a custom configuration.
pub async fn start_server_with(config: ServiceConfig) -> TestServer {
    init_log_capture();

    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();

    let state = AppState {
        calculator: CalculatorState {
            spans: SpanManager::new(
                provider.tracer("integration"),
                config.observability.untraced_paths.iter().cloned(),
            ),
            metrics: CalculatorMetrics::register(&SdkMeterProvider::default()).unwrap(),
        },
        prometheus: Some(install_prometheus().unwrap()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, state);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        spans: exporter,
        _provider: provider,
        shutdown,
        handle,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuf {
    type Writer = SharedBuf;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

static LOGS: OnceLock<SharedBuf> = OnceLock::new();

/// Install a process-wide JSON subscriber writing into memory. Server
/// tasks run on worker threads, so a thread-local default would miss them.
fn init_log_capture() {
    LOGS.get_or_init(|| {
        let buf = SharedBuf::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_env_filter("calculator_api=info")
            .with_writer(buf.clone())
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
        buf
    });
}

/// Every JSON log line captured so far in this test binary.
pub fn captured_logs() -> Vec<serde_json::Value> {
    let Some(buf) = LOGS.get() else {
        return Vec::new();
    };
    let bytes = buf.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes)
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
