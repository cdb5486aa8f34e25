//! Telemetry setup for processes that use the tracing client
//!
//! Builds the OpenTelemetry tracer provider whose tracer is handed to
//! [`TracingClient`](crate::client::TracingClient), and the `tracing`
//! subscriber that carries the crate's own logs. Nothing here is registered
//! globally except the subscriber; the provider is owned by [`Telemetry`] and
//! flushed when it drops.

pub mod logging;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::trace::{BatchSpanProcessor, Builder, Config, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use tracing::{info, warn};

pub use logging::{init_logging, LoggingGuard};

use crate::config::{ExportMode, KubetracerConfig, TelemetryConfig};
use crate::{KubetracerError, Result};

/// Build a tracer provider from configuration.
///
/// Returns `Ok(None)` when telemetry is disabled. The provider is not
/// installed as the global provider.
pub fn init_tracer_provider(config: &TelemetryConfig) -> Result<Option<TracerProvider>> {
    if !config.enabled {
        info!("Telemetry disabled, skipping tracer provider setup");
        return Ok(None);
    }
    config.validate()?;

    let resource = Resource::new(vec![
        KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ]);
    let mut builder =
        TracerProvider::builder().with_config(Config::default().with_resource(resource));

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = otlp_exporter(config, endpoint)?;
        builder = with_exporter(builder, exporter, config.export_mode);
        info!(endpoint = %endpoint, mode = ?config.export_mode, "OTLP exporter configured");
    }

    if config.console_export {
        info!("Enabling console span exporter");
        builder = with_exporter(
            builder,
            opentelemetry_stdout::SpanExporter::default(),
            config.export_mode,
        );
    }

    Ok(Some(builder.build()))
}

/// HTTP for `:4318` endpoints, gRPC for everything else
fn otlp_exporter(config: &TelemetryConfig, endpoint: &str) -> Result<opentelemetry_otlp::SpanExporter> {
    let exporter = if config.uses_http() {
        let http_endpoint = if endpoint.ends_with("/v1/traces") {
            endpoint.to_string()
        } else {
            format!("{}/v1/traces", endpoint.trim_end_matches('/'))
        };
        opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(http_endpoint)
            .with_headers(config.otlp_headers.clone())
            .build_span_exporter()
    } else {
        if !config.otlp_headers.is_empty() {
            warn!("OTLP headers are only sent over HTTP, ignoring them for gRPC export");
        }
        opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint)
            .build_span_exporter()
    };

    exporter.map_err(|e| {
        KubetracerError::configuration_error(format!("Failed to build OTLP exporter: {}", e))
    })
}

fn with_exporter<E>(builder: Builder, exporter: E, mode: ExportMode) -> Builder
where
    E: SpanExporter + 'static,
{
    match mode {
        ExportMode::Batch => {
            builder.with_span_processor(BatchSpanProcessor::builder(exporter, runtime::Tokio).build())
        }
        ExportMode::Simple => builder.with_simple_exporter(exporter),
    }
}

/// Named tracer from `provider`, using the configured scope name
pub fn tracer(provider: &TracerProvider, config: &TelemetryConfig) -> Tracer {
    provider.tracer(config.tracer_name.clone())
}

/// Tracer provider plus logging for a whole process.
///
/// With telemetry disabled the provider has no exporters: spans still get
/// valid ids, so trace markers keep propagating, but nothing is exported.
pub struct Telemetry {
    provider: TracerProvider,
    tracer_name: String,
    _logging: LoggingGuard,
}

impl Telemetry {
    /// Set up span export and the `tracing` subscriber.
    ///
    /// Must run inside a Tokio runtime when batch export is configured.
    pub fn init(config: &KubetracerConfig) -> Result<Self> {
        config.validate()?;
        let provider = init_tracer_provider(&config.telemetry)?.unwrap_or_default();
        let bridge = config
            .logging
            .otel_bridge
            .then(|| tracer(&provider, &config.telemetry));
        let logging = init_logging(&config.logging, bridge)?;

        Ok(Self {
            provider,
            tracer_name: config.telemetry.tracer_name.clone(),
            _logging: logging,
        })
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Tracer to pass to the tracing client
    pub fn tracer(&self) -> Tracer {
        self.provider.tracer(self.tracer_name.clone())
    }

    /// Export every span that has ended so far
    pub fn flush(&self) {
        for result in self.provider.force_flush() {
            if let Err(e) = result {
                warn!(error = %e, "Failed to flush spans");
            }
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.flush();
    }
}
