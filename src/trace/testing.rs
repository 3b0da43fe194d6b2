//! In-memory span capture for unit tests.

use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};

use super::Tracer;

/// An enabled tracer whose spans land in the returned exporter as they end.
pub(crate) fn recorder() -> (Tracer, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    (Tracer::with_exporter(true, exporter.clone()), exporter)
}

pub(crate) fn finished(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
    exporter.get_finished_spans().unwrap()
}

pub(crate) fn find(exporter: &InMemorySpanExporter, name: &str) -> SpanData {
    finished(exporter)
        .into_iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("no finished span named {name}"))
}
