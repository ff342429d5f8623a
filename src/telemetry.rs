use anyhow::{Context, Result, anyhow, bail};
use opentelemetry::trace::{
    SpanBuilder, TraceContextExt, Tracer, TracerProvider as OtelTracerProvider,
};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Telemetry handle for OpenTelemetry tracing.
pub(crate) struct Telemetry {
    tracer: opentelemetry_sdk::trace::SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Initialize telemetry with an OTLP HTTP exporter.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(&endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    /// Run `f` inside a span named `name`.
    ///
    /// Without `parent` the span nests under the calling thread's current
    /// context. Rayon workers pass the context captured on the spawning thread.
    pub(crate) fn in_span<T, F>(
        &self,
        name: &str,
        attributes: &[KeyValue],
        parent: Option<&OtelContext>,
        f: F,
    ) -> T
    where
        F: FnOnce() -> T,
    {
        let current;
        let parent_cx = match parent {
            Some(parent_cx) => parent_cx,
            None => {
                current = OtelContext::current();
                &current
            }
        };
        let span = self.tracer.build_with_context(
            SpanBuilder::from_name(name.to_string()).with_attributes(attributes.to_vec()),
            parent_cx,
        );
        let _guard = parent_cx.with_span(span).attach();
        f()
    }

    /// Flush spans and shut down the tracer provider.
    pub(crate) fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.provider.shutdown() {
            return Err(anyhow!("failed to shutdown tracer provider: {err}"));
        }
        Ok(())
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        let resource = Resource::builder()
            .with_service_name("purgeannorefs")
            .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
            .build();
        // Spans end on rayon worker threads; the batch processor exports from
        // its own thread through the blocking reqwest client.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(65_536)
            .with_max_export_batch_size(4096)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer("purgeannorefs");
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("OTLP endpoint must use http or https, got {}", url.scheme());
    }
    let path = url.path().to_string();
    if path == "/" {
        url.set_path("/v1/traces");
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}/v1/traces"));
    }
    Ok(url.to_string())
}

/// Default log filter; `--quiet` keeps only warnings and errors.
fn default_directive(quiet: bool) -> &'static str {
    if quiet {
        "warn"
    } else {
        "purgeannorefs=info,warn"
    }
}

/// Install the stderr `tracing` subscriber; `RUST_LOG` overrides the default
/// filter.
pub(crate) fn init_logging(quiet: bool) {
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive(quiet))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

/// Return the trace ID of the current span context when available.
pub(crate) fn current_trace_id() -> Option<String> {
    let cx = OtelContext::current();
    let span = cx.span();
    let span_context = span.span_context();
    if !span_context.is_valid() {
        return None;
    }
    Some(span_context.trace_id().to_string())
}

/// Run `f` inside a span when telemetry is enabled.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, None, f),
        None => f(),
    }
}

/// Like [`with_span`], but parented on a context captured by the caller.
pub(crate) fn with_child_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    parent_cx: &OtelContext,
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, Some(parent_cx), f),
        None => f(),
    }
}
