//! Observability for dvarapala
//!
//! OTLP trace and metric export through OpenTelemetry, the tracing
//! subscriber setup, and the service's metric instruments.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _},
    trace::TracerProvider as TracerProviderTrait,
    KeyValue,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::TracerProvider, Resource};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

use crate::config::{LoggingConfig, OtelConfig};

/// File written inside `logging.dir`
pub const LOG_FILE_NAME: &str = "api.log";

/// OpenTelemetry error types
#[derive(Debug, Error)]
pub enum OtelError {
    /// Failed to initialize tracer
    #[error("Failed to initialize tracer: {0}")]
    TracerInit(String),

    /// Failed to initialize meter
    #[error("Failed to initialize meter: {0}")]
    MeterInit(String),

    /// Failed to open the log file
    #[error("Failed to open log file: {0}")]
    LogFile(String),

    /// Failed to shutdown
    #[error("Failed to shutdown: {0}")]
    Shutdown(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// OpenTelemetry provider
///
/// Exports over OTLP/gRPC when enabled. When disabled, spans are dropped and
/// metrics are aggregated in-process only.
pub struct OtelProvider {
    tracer_provider: Option<TracerProvider>,
    meter_provider: SdkMeterProvider,
    config: OtelConfig,
}

impl OtelProvider {
    /// Create a new OtelProvider with the given configuration
    pub fn new(config: &OtelConfig) -> Result<Self, OtelError> {
        let resource = Resource::new(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]);

        if !config.enabled {
            return Ok(Self {
                tracer_provider: None,
                meter_provider: SdkMeterProvider::builder().with_resource(resource).build(),
                config: config.clone(),
            });
        }

        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| OtelError::Config("OTLP endpoint is required when enabled".into()))?;

        let tracer_provider = Self::init_tracer_provider(endpoint, &resource)?;
        let meter_provider = Self::init_meter_provider(endpoint, &resource)?;

        global::set_tracer_provider(tracer_provider.clone());

        Ok(Self {
            tracer_provider: Some(tracer_provider),
            meter_provider,
            config: config.clone(),
        })
    }

    fn init_tracer_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<TracerProvider, OtelError> {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::runtime;
        use opentelemetry_sdk::trace::{Config, Sampler};

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
            .map_err(|e| OtelError::TracerInit(e.to_string()))?;

        Ok(TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(resource.clone()),
            )
            .build())
    }

    fn init_meter_provider(
        endpoint: &str,
        resource: &Resource,
    ) -> Result<SdkMeterProvider, OtelError> {
        use opentelemetry_otlp::{MetricsExporterBuilder, WithExportConfig};
        use opentelemetry_sdk::metrics::reader::{
            DefaultAggregationSelector, DefaultTemporalitySelector,
        };
        use opentelemetry_sdk::{metrics::PeriodicReader, runtime};

        let exporter = MetricsExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .build_metrics_exporter(
            Box::new(DefaultTemporalitySelector::new()),
            Box::new(DefaultAggregationSelector::new()),
        )
        .map_err(|e| OtelError::MeterInit(e.to_string()))?;

        Ok(SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(PeriodicReader::builder(exporter, runtime::Tokio).build())
            .build())
    }

    /// Get a tracer from the provider
    pub fn tracer(&self, name: &'static str) -> opentelemetry_sdk::trace::Tracer {
        match self.tracer_provider {
            Some(ref tp) => tp.tracer(name),
            None => TracerProvider::builder().build().tracer(name),
        }
    }

    /// Get the meter for creating metrics
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(self.config.service_name.clone())
    }

    /// Check if OpenTelemetry export is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Flush and shut down the providers
    pub fn shutdown(&self) -> Result<(), OtelError> {
        self.meter_provider
            .shutdown()
            .map_err(|e| OtelError::Shutdown(format!("Meter shutdown failed: {:?}", e)))?;

        if let Some(ref tp) = self.tracer_provider {
            for result in tp.force_flush() {
                result.map_err(|e| {
                    OtelError::Shutdown(format!("Tracer flush failed: {:?}", e))
                })?;
            }
        }

        Ok(())
    }
}

impl Drop for OtelProvider {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Outcome label for login attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    InvalidCredentials,
    Error,
}

impl LoginOutcome {
    fn as_str(self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::InvalidCredentials => "invalid_credentials",
            LoginOutcome::Error => "error",
        }
    }
}

/// Service metrics
pub struct Metrics {
    /// Total number of requests served
    pub requests_total: Counter<u64>,

    /// Request processing duration in seconds
    pub request_duration: Histogram<f64>,

    /// Login attempts by outcome
    pub login_attempts_total: Counter<u64>,

    /// Requests turned away by the authorization gate, by reason
    pub auth_rejections_total: Counter<u64>,

    /// Requests refused by the rate limiter
    pub rate_limited_total: Counter<u64>,
}

impl Metrics {
    /// Create new metrics with the given meter
    pub fn new(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("dvarapala_requests_total")
                .with_description("Total number of requests served")
                .init(),
            request_duration: meter
                .f64_histogram("dvarapala_request_duration_seconds")
                .with_description("Request processing duration in seconds")
                .init(),
            login_attempts_total: meter
                .u64_counter("dvarapala_login_attempts_total")
                .with_description("Login attempts by outcome")
                .init(),
            auth_rejections_total: meter
                .u64_counter("dvarapala_auth_rejections_total")
                .with_description("Requests rejected by the authorization gate")
                .init(),
            rate_limited_total: meter
                .u64_counter("dvarapala_rate_limited_total")
                .with_description("Requests refused by the rate limiter")
                .init(),
        }
    }

    /// Record a served request
    pub fn record_request(&self, method: &str, status: u16) {
        self.requests_total.add(
            1,
            &[
                KeyValue::new("method", method.to_string()),
                KeyValue::new("status", i64::from(status)),
            ],
        );
    }

    /// Record request duration
    pub fn record_request_duration(&self, method: &str, duration_secs: f64) {
        self.request_duration
            .record(duration_secs, &[KeyValue::new("method", method.to_string())]);
    }

    /// Record a login attempt
    pub fn record_login(&self, outcome: LoginOutcome) {
        self.login_attempts_total
            .add(1, &[KeyValue::new("outcome", outcome.as_str())]);
    }

    /// Record a gate rejection
    pub fn record_auth_rejection(&self, reason: &'static str) {
        self.auth_rejections_total
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    /// Record a rate-limited request
    pub fn record_rate_limited(&self) {
        self.rate_limited_total.add(1, &[]);
    }
}

impl Default for Metrics {
    /// Metrics on the global meter provider (a no-op unless one is installed)
    fn default() -> Self {
        Self::new(&global::meter("dvarapala"))
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn open_log_file(dir: &str) -> Result<File, OtelError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| OtelError::LogFile(format!("{}: {}", dir, e)))?;

    let path = Path::new(dir).join(LOG_FILE_NAME);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| OtelError::LogFile(format!("{}: {}", path.display(), e)))
}

/// Initialize the tracing subscriber
///
/// Logs go to stdout (JSON, or human-readable with `format: pretty`), to
/// `<dir>/api.log` as JSON lines when `logging.dir` is set, and to the OTLP
/// exporter when OpenTelemetry is enabled.
pub fn init_tracing(otel: &OtelProvider, logging: &LoggingConfig) -> Result<(), OtelError> {
    let filter = LevelFilter::from_level(parse_level(&logging.level));

    let stdout_layer = if logging.format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::fmt::layer().pretty().boxed()
    } else {
        tracing_subscriber::fmt::layer().json().boxed()
    };

    let file_layer = match logging.dir.as_deref() {
        Some(dir) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(dir)?)),
        ),
        None => None,
    };

    let otel_layer = otel
        .is_enabled()
        .then(|| tracing_opentelemetry::layer().with_tracer(otel.tracer("dvarapala")));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| OtelError::TracerInit(e.to_string()))
}
