//! `OpenTelemetry` export of traces and metrics.
//!
//! Only compiled with the `metrics` feature. Registries record operation
//! latency through [`latency_histogram`].

use std::time::Duration;

use opentelemetry::metrics::Histogram;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Name of the meter all Lorastack instruments live on.
pub const METER_NAME: &str = "lorastack";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Keeps the providers alive. Call [`MetricsGuard::shutdown`] to flush
/// before exiting.
pub struct MetricsGuard {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl MetricsGuard {
    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Export traces and metrics of `service_name` to the OTLP gRPC `endpoint`.
pub fn init_metrics(service_name: &str, endpoint: &str) -> Result<MetricsGuard, MetricsError> {
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_periodic_exporter(metric_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(MetricsGuard {
        tracer_provider,
        meter_provider,
    })
}

/// Histogram of operation latency in seconds.
pub fn latency_histogram(name: &'static str) -> Histogram<f64> {
    global::meter(METER_NAME)
        .f64_histogram(name)
        .with_unit("s")
        .with_description("Latency of registry operations")
        .build()
}

/// Record `elapsed` for `action` on `entity`.
pub fn record_latency(histogram: &Histogram<f64>, entity: &str, action: &str, elapsed: Duration) {
    histogram.record(elapsed.as_secs_f64(), &latency_labels(entity, action));
}

fn latency_labels(entity: &str, action: &str) -> [KeyValue; 2] {
    [
        KeyValue::new("entity", entity.to_string()),
        KeyValue::new("action", action.to_string()),
    ]
}
