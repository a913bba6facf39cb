//! OpenTelemetry exporter adapter.
//!
//! A thin wrapper around the OTLP/HTTP exporter factory and the SDK tracer
//! provider, kept narrow on purpose: the rest of the subsystem only needs
//! "build a provider from the option map" and "start a server span at this
//! wall-clock time". Span mutation happens through the regular
//! [`opentelemetry::trace::Span`] trait methods.

use crate::config::{TraceConfigMap, TraceMode};
use crate::error::TraceError;
use crate::Result;
use opentelemetry::trace::{SpanKind, Tracer as _, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::trace::{Config, TracerProvider};
use opentelemetry_sdk::Resource;
use std::time::SystemTime;
use tracing::debug;

const TRACER_NAME: &str = "infertrace";
const SPAN_NAME: &str = "InferRequest";

/// One tracer provider wired to an OTLP/HTTP exporter
///
/// Built per sampled trace so that in-flight traces keep exporting through
/// the endpoint they were sampled with, regardless of later setting updates.
pub struct OtelTracer {
    provider: TracerProvider,
}

impl OtelTracer {
    /// Build a provider from the OpenTelemetry section of the option map
    ///
    /// The `url` option overrides the exporter endpoint; unrecognized
    /// options are ignored.
    pub fn from_config(config_map: &TraceConfigMap) -> Result<Self> {
        let mut exporter = opentelemetry_otlp::new_exporter().http();
        if let Some(options) = config_map.get(&TraceMode::OpenTelemetry) {
            for (name, value) in options {
                match name.as_str() {
                    "url" => exporter = exporter.with_endpoint(value.clone()),
                    other => debug!("ignoring unrecognized OpenTelemetry option: {}", other),
                }
            }
        }
        let exporter = exporter.build_span_exporter().map_err(|err| {
            TraceError::invalid_argument(format!("failed to build OTLP exporter: {}", err))
        })?;
        Ok(Self::with_exporter(exporter))
    }

    /// Build a provider around an arbitrary span exporter
    pub fn with_exporter<E: SpanExporter + 'static>(exporter: E) -> Self {
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter)
            .with_config(Config::default().with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                TRACER_NAME,
            )])))
            .build();
        Self { provider }
    }

    /// Start the server span for one inference request
    pub fn start_span(&self, start_time: SystemTime) -> opentelemetry_sdk::trace::Span {
        let tracer = self.provider.tracer(TRACER_NAME);
        tracer
            .span_builder(SPAN_NAME)
            .with_kind(SpanKind::Server)
            .with_start_time(start_time)
            .start(&tracer)
    }
}
