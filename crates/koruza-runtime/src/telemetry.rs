//! Tracing initialisation for the daemon.
//!
//! Call [`init_tracing`] once at process startup.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `KORUZA_LOG_FORMAT=json` | Emit newline-delimited JSON logs instead of the compact format. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL; when set, spans are exported. |
//!
//! # Example
//!
//! ```rust,no_run
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = koruza_runtime::telemetry::init_tracing("koruza");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber: env filter, compact or JSON formatter and,
/// if configured, the OTLP span exporter.
///
/// The returned guard must be held for the lifetime of the process; dropping
/// it flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let provider = build_provider(service_name);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("koruza")));
    let (compact, json) = if json_requested() {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer().compact()), None)
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(compact)
        .with(json)
        .try_init();
    if let Err(e) = installed {
        eprintln!("[koruza] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

fn json_requested() -> bool {
    std::env::var("KORUZA_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Shuts the span exporter down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        let Some(provider) = self.0.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("[koruza] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// Build a provider when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Returns `None` when the variable is absent or the exporter cannot be
/// built (the error goes to stderr; logging is not up yet).
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[koruza] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Synchronous export: the tokio runtime does not exist yet at init time.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}
