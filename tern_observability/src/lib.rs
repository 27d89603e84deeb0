use std::{borrow::Cow, time::Duration};

use opentelemetry::{InstrumentationScope, global, trace::TracerProvider as _};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader},
    trace::SdkTracerProvider,
};
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer, prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

pub use crate::format::TernFormat;

mod format;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("failed to build OTLP exporter"))]
    Exporter { source: ExporterBuildError },
    #[snafu(display("failed to install the tracing subscriber"))]
    Install {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Returns the meter registered under `name` by the global meter provider.
///
/// Instruments created before [`init_observability`] record nothing.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the global tracing subscriber and meter provider.
///
/// Logs go to stdout, filtered by `RUST_LOG` (default `info`). Set
/// `RUST_LOG_FORMAT=json` for JSON lines. Spans and metrics are exported over
/// OTLP only when `OTEL_SDK_DISABLED=false`.
pub fn init_observability(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
) -> Result<(), ObservabilityError> {
    // Exports are disabled unless explicitly enabled.
    let sdk_disabled = std::env::var(OTEL_SDK_DISABLED)
        .map(|v| v != "false")
        .unwrap_or(true);

    let mut layers = vec![stdout()];
    if !sdk_disabled {
        layers.push(otel(package_name, package_version)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context(InstallSnafu {})?;

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn stdout<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let json_fmt = std::env::var("RUST_LOG_FORMAT")
        .map(|val| val == "json")
        .unwrap_or(false);

    if json_fmt {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(env_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .event_format(TernFormat::default())
            .fmt_fields(TernFormat::default())
            .with_filter(env_filter())
            .boxed()
    }
}

fn otel<S>(
    package_name: impl Into<Cow<'static, str>>,
    version: impl Into<Cow<'static, str>>,
) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let package_name = package_name.into();
    let resource = Resource::builder()
        .with_service_name(package_name.to_string())
        .build();

    let scope = InstrumentationScope::builder(package_name)
        .with_version(version.into())
        .build();

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;
    let trace_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter)
        .build();
    let tracer = trace_provider.tracer_with_scope(scope);

    let metric_exporter = MetricExporter::builder()
        .with_tonic()
        .build()
        .context(ExporterSnafu {})?;
    let reader = PeriodicReader::builder(metric_exporter)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();
    let meter_provider = MeterProviderBuilder::default()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    global::set_meter_provider(meter_provider.clone());

    let layer = env_filter()
        .and_then(MetricsLayer::new(meter_provider))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed();

    Ok(layer)
}
