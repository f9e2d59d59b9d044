//! Logging setup: console output through `tracing-subscriber`, plus optional OTLP trace export.
//!
//! Console verbosity follows `RUST_LOG` (default `info`). OTLP export is off unless
//! `enable_otel_export` is set, and is then configured with the standard OpenTelemetry variables:
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` (default `http://localhost:4318`)
//! - `OTEL_EXPORTER_OTLP_PROTOCOL`: `http/protobuf` or `http/json`
//! - `OTEL_EXPORTER_OTLP_HEADERS`: comma-separated `key=value` pairs, `%20` decoded to a space
//! - `OTEL_SERVICE_NAME` (default `imgpipe`)
//!
//! ```bash
//! IMGPIPE_ENABLE_OTEL_EXPORT=true \
//! OTEL_EXPORTER_OTLP_ENDPOINT=https://otlp-gateway.example.com/otlp \
//! imgpipe --subject cats
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "imgpipe";
const DEFAULT_ENDPOINT: &str = "http://localhost:4318";

/// Kept so pending spans can be flushed on exit; the tracing layer only holds a tracer.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// OTLP exporter settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
struct OtlpSettings {
    service_name: String,
    endpoint: String,
    protocol: Protocol,
    headers: HashMap<String, String>,
}

impl OtlpSettings {
    fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let protocol = match lookup("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Some("http/json") => Protocol::HttpJson,
            _ => Protocol::HttpBinary,
        };

        Self {
            service_name: lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            protocol,
            headers: lookup("OTEL_EXPORTER_OTLP_HEADERS")
                .map(|raw| parse_headers(&raw))
                .unwrap_or_default(),
        }
    }
}

fn parse_headers(raw: &str) -> HashMap<String, String> {
    raw.replace("%20", " ")
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Install the global subscriber.
///
/// If OTLP export is requested but the exporter cannot be built, console logging is still set up
/// and the reason is logged.
pub fn init_telemetry(enable_otel_export: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if !enable_otel_export {
        registry.try_init()?;
        info!("Telemetry initialized (OTLP export disabled)");
        return Ok(());
    }

    match create_otlp_tracer(OtlpSettings::from_env()) {
        Ok(tracer) => {
            registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).try_init()?;
            info!("Telemetry initialized with OTLP export enabled");
        }
        Err(e) => {
            registry.try_init()?;
            info!(error = %e, "Telemetry initialized without OTLP export");
        }
    }

    Ok(())
}

fn create_otlp_tracer(settings: OtlpSettings) -> anyhow::Result<opentelemetry_sdk::trace::Tracer> {
    // The subscriber is not installed yet
    eprintln!(
        "[OTLP] service={} endpoint={} headers={}",
        settings.service_name,
        settings.endpoint,
        settings.headers.len()
    );

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(&settings.endpoint)
        .with_protocol(settings.protocol)
        .with_headers(settings.headers)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_attribute(KeyValue::new("service.name", settings.service_name.clone()))
                .build(),
        )
        .build();

    let tracer = provider.tracer(settings.service_name);
    let _ = TRACER_PROVIDER.set(provider);
    Ok(tracer)
}

/// Flush pending spans. Call before the process exits.
pub fn shutdown_telemetry() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        tracing::error!("Failed to shutdown tracer provider: {}", e);
    }
}
