//! # Telemetry Features
//!
//! Console logging is always on through `tracing-subscriber`. Spans and
//! metrics are optional and exported via OpenTelemetry to an OTLP collector
//! and/or stdout.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables OpenTelemetry distributed tracing (one span per RPC).
//! - `metrics`: Enables OpenTelemetry metrics (RPC counts, durations, chunk
//!   counts), labelled by RPC name.
//! - `otlp`: Enables the OTLP/gRPC exporter. The collector endpoint is read
//!   from `OTEL_EXPORTER_OTLP_ENDPOINT`; optional `OTEL_EXPORTER_OTLP_HEADERS`
//!   (`key=value,key=value`) and `OTEL_EXPORTER_OTLP_COMPRESSION` are honored.
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `tracing` or `metrics`.
//! - Both `otlp` and `stdout` exporters can be enabled at the same time.
//!
//! ## Example usage
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//!     cargo run --bin philote-server --features tracing,metrics,otlp
//! ```
//!
//! Local stdout export only:
//!
//! ```bash
//! cargo run --bin philote-server --features tracing,stdout
//! ```

// Disallow using `otlp` without `tracing` or `metrics`
#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// OTLP-specific imports
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "otlp")]
use tonic::metadata::{MetadataKey, MetadataMap};
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use tonic::transport::ClientTlsConfig;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "philote";

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every enabled provider. Failures are printed,
    /// since the subscriber may already be gone.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Human-readable console output, independent of the OpenTelemetry stdout
    // exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Parses `OTEL_EXPORTER_OTLP_HEADERS` (`key=value,key=value`).
#[cfg(feature = "otlp")]
fn get_metadata() -> anyhow::Result<MetadataMap> {
    use anyhow::Context;

    let mut map = MetadataMap::new();
    let Ok(raw) = std::env::var("OTEL_EXPORTER_OTLP_HEADERS") else {
        return Ok(map);
    };
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid OTLP header `{pair}`"))?;
        let key = MetadataKey::from_bytes(key.trim().to_ascii_lowercase().as_bytes())
            .with_context(|| format!("invalid OTLP header key `{key}`"))?;
        map.insert(
            key,
            value.trim().parse().context("invalid OTLP header value")?,
        );
    }
    Ok(map)
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    compression: Compression,
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
fn otlp_settings() -> anyhow::Result<OtlpSettings> {
    use anyhow::Context;
    use std::str::FromStr;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .context("missing `OTEL_EXPORTER_OTLP_ENDPOINT`")?;
    let compression = std::env::var("OTEL_EXPORTER_OTLP_COMPRESSION")
        .unwrap_or_else(|_| "gzip".to_string())
        .to_ascii_lowercase();
    Ok(OtlpSettings {
        endpoint,
        metadata: get_metadata()?,
        compression: Compression::from_str(&compression)?,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = otlp_settings()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder().with_tonic();
        let exporter = if settings.endpoint.starts_with("https") {
            exporter.with_tls_config(ClientTlsConfig::new().with_native_roots())
        } else {
            exporter
        };
        let exporter = exporter
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = otlp_settings()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder().with_tonic();
        let exporter = if settings.endpoint.starts_with("https") {
            exporter.with_tls_config(ClientTlsConfig::new().with_native_roots())
        } else {
            exporter
        };
        let exporter = exporter
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RPC_REQUESTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPCS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CHUNKS_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CHUNKS_SENT: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = RPC_REQUESTS.set(
        meter
            .u64_counter("rpc_requests")
            .with_description("Total discipline RPCs")
            .build(),
    );

    let _ = RPC_ERRORS.set(
        meter
            .u64_counter("rpc_errors")
            .with_description("Failed or cancelled discipline RPCs")
            .build(),
    );

    let _ = RPCS_INFLIGHT.set(
        meter
            .i64_up_down_counter("rpcs_inflight")
            .with_description("Concurrent discipline RPCs")
            .build(),
    );

    let _ = RPC_DURATION_MS.set(
        meter
            .f64_histogram("rpc_duration")
            .with_unit("ms")
            .with_description("End-to-end RPC duration, including result streaming")
            .build(),
    );

    let _ = CHUNKS_RECEIVED.set(
        meter
            .u64_counter("chunks_received")
            .with_description("Array chunks received from clients")
            .build(),
    );

    let _ = CHUNKS_SENT.set(
        meter
            .u64_counter("chunks_sent")
            .with_description("Array chunks streamed to clients")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_requests(rpc: &'static str) {
    if let Some(counter) = RPC_REQUESTS.get() {
        counter.add(1, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests(_rpc: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_errors(rpc: &'static str) {
    if let Some(counter) = RPC_ERRORS.get() {
        counter.add(1, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_errors(_rpc: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_inflight(rpc: &'static str) {
    if let Some(counter) = RPCS_INFLIGHT.get() {
        counter.add(1, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_inflight(_rpc: &'static str) {}

#[cfg(feature = "metrics")]
pub fn decrement_inflight(rpc: &'static str) {
    if let Some(counter) = RPCS_INFLIGHT.get() {
        counter.add(-1, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_inflight(_rpc: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_duration(rpc: &'static str, duration_ms: f64) {
    if let Some(histogram) = RPC_DURATION_MS.get() {
        histogram.record(duration_ms, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_duration(_rpc: &'static str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_chunks_received(rpc: &'static str, count: u64) {
    if let Some(counter) = CHUNKS_RECEIVED.get() {
        counter.add(count, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_chunks_received(_rpc: &'static str, _count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_chunks_sent(rpc: &'static str, count: u64) {
    if let Some(counter) = CHUNKS_SENT.get() {
        counter.add(count, &[KeyValue::new("rpc", rpc)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_chunks_sent(_rpc: &'static str, _count: u64) {}
