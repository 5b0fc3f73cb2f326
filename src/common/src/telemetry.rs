use anyhow::Result;
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::env;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318/v1/traces";

/// Installs the global subscriber: `RUST_LOG` filtering, compact fmt output and
/// an OpenTelemetry layer (stdout exporter unless `OTEL_TRACES_EXPORTER=otlp`).
///
/// `service_name` doubles as the crate whose logs are enabled at `info` by default.
pub fn init_telemetry(service_name: &'static str) {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_enabled = env::var("OTEL_TRACES_EXPORTER")
        .map(|v| v == "otlp")
        .unwrap_or(false);

    let tracer = if otlp_enabled {
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        match create_otlp_tracer(&endpoint, service_name) {
            Ok(tracer) => tracer,
            Err(e) => {
                eprintln!("failed to initialize OTLP tracer for {service_name}: {e}; using stdout");
                init_stdout_tracer(service_name)
            }
        }
    } else {
        init_stdout_tracer(service_name)
    };

    let mut filter = EnvFilter::from_default_env();
    for directive in [format!("{service_name}=info"), "common=info".to_string()] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(OpenTelemetryLayer::new(tracer))
        .init();
}

fn create_otlp_tracer(
    endpoint: &str,
    service_name: &'static str,
) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    // Only the HTTP transport is wired; gRPC endpoints fall back to stdout.
    if !(endpoint.contains("4318") || endpoint.contains("/v1/traces")) {
        return Err(anyhow::anyhow!(
            "only OTLP over HTTP is supported (got {endpoint})"
        ));
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();

    Ok(provider.tracer(service_name))
}

fn init_stdout_tracer(service_name: &'static str) -> opentelemetry_sdk::trace::Tracer {
    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();

    provider.tracer(service_name)
}
