//! The process-wide span tracer.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use opentelemetry::Context;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracer, SdkTracerProvider, SpanExporter,
};

use super::attr::Attributes;
use super::span::{Span, SpanGuard};
use crate::config::TracingConfig;
use crate::context::TraceState;
use crate::error::ExportError;
use crate::log::Logger;

const INSTRUMENTATION_SCOPE: &str = env!("CARGO_PKG_NAME");

/// Opens spans on an OpenTelemetry [`SdkTracerProvider`].
///
/// Cloning is cheap; every clone shares the enable flag and the provider.
/// While disabled, [`start_span`](Tracer::start_span) returns `None`,
/// [`with_span`](Tracer::with_span) just awaits the wrapped future, and
/// [`enter`](Tracer::enter) opens nothing.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    enabled: AtomicBool,
    provider: SdkTracerProvider,
    tracer: SdkTracer,
    logger: Logger,
}

impl Tracer {
    pub fn new(enabled: bool, provider: SdkTracerProvider) -> Self {
        let tracer = provider.tracer(INSTRUMENTATION_SCOPE);
        Self {
            inner: Arc::new(TracerInner {
                enabled: AtomicBool::new(enabled),
                provider,
                tracer,
                logger: Logger::new("[trace]"),
            }),
        }
    }

    /// A tracer that never records anything.
    pub fn disabled() -> Self {
        Self::new(false, SdkTracerProvider::builder().build())
    }

    /// Hands every span to `exporter` the moment it ends, without batching.
    /// Meant for tests and local debugging.
    pub fn with_exporter<E: SpanExporter + 'static>(enabled: bool, exporter: E) -> Self {
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_simple_exporter(exporter)
            .build();
        Self::new(enabled, provider)
    }

    /// OTLP/HTTP export through the SDK's batch processor.
    pub fn from_config(config: &TracingConfig) -> Result<Self, ExportError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(config.endpoint.clone())
            .with_timeout(config.export_timeout)
            .build()?;
        let batch = BatchConfigBuilder::default()
            .with_max_queue_size(config.queue_capacity)
            .with_max_export_batch_size(config.batch_size)
            .with_scheduled_delay(config.flush_interval)
            .build();
        let resource = Resource::builder().with_service_name(config.service_name.clone()).build();

        let provider = SdkTracerProvider::builder()
            .with_span_processor(BatchSpanProcessor::builder(exporter).with_batch_config(batch).build())
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource)
            .build();
        Ok(Self::new(true, provider))
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Flips the flag for spans opened from now on. Open spans still close normally.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Opens a span under `parent`. An empty parent context starts a new trace.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: &Context,
    ) -> Option<Span> {
        self.open(name.into(), kind, parent, Attributes::new())
    }

    fn open(
        &self,
        name: Cow<'static, str>,
        kind: SpanKind,
        parent: &Context,
        attrs: Attributes,
    ) -> Option<Span> {
        if !self.is_enabled() {
            return None;
        }
        let span = self
            .inner
            .tracer
            .span_builder(name.clone())
            .with_kind(kind)
            .with_attributes(Vec::from(attrs))
            .start_with_context(&self.inner.tracer, parent);
        Some(Span::new(parent.with_span(span), name))
    }

    /// Runs `work` inside a span named `name`, child of `parent`.
    ///
    /// `attrs` are set up front (absent values were already skipped by
    /// [`Attributes::with_opt`]). The span closes with `Ok` or, when `work`
    /// yields `Err`, records the error as an exception and closes with
    /// `Error`. If `work` panics or is dropped mid-flight the span still
    /// closes, as cancelled. The result passes through untouched.
    ///
    /// The span does not become the request's current span; use
    /// [`enter`](Tracer::enter) for work that runs further handlers.
    pub async fn with_span<T, E, F>(
        &self,
        parent: &Context,
        name: impl Into<Cow<'static, str>>,
        attrs: Attributes,
        work: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let Some(span) = self.open(name.into(), SpanKind::Internal, parent, attrs) else {
            return work.await;
        };
        let guard = SpanGuard::new(span);
        let result = work.await;
        close(guard, &result);
        result
    }

    /// Opens a child of the request's current span and makes it current until
    /// [`SpanScope::exit`], so spans opened downstream nest under it.
    pub fn enter(
        &self,
        tracing: &mut TraceState,
        name: impl Into<Cow<'static, str>>,
        attrs: Attributes,
    ) -> SpanScope {
        let parent = tracing.parent();
        match self.open(name.into(), SpanKind::Internal, &parent, attrs) {
            Some(span) => {
                let previous = tracing.replace_current(span.clone());
                SpanScope { entered: Some((SpanGuard::new(span), previous)) }
            }
            None => SpanScope { entered: None },
        }
    }

    /// Exports everything the batch processor is holding.
    pub async fn force_flush(&self) {
        let provider = self.inner.provider.clone();
        self.blocking("flush", move || provider.force_flush()).await;
    }

    /// Flushes buffered spans and stops the exporter.
    pub async fn shutdown(&self) {
        let provider = self.inner.provider.clone();
        self.blocking("shutdown", move || provider.shutdown()).await;
    }

    async fn blocking<F, E>(&self, what: &str, call: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        match tokio::task::spawn_blocking(call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.inner.logger.warn(format!("{what} failed: {e}")),
            Err(e) => self.inner.logger.error(format!("{what} task failed: {e}")),
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("enabled", &self.is_enabled()).finish_non_exhaustive()
    }
}

/// A span made current by [`Tracer::enter`].
///
/// Dropping the scope without calling [`exit`](SpanScope::exit) closes the
/// span as cancelled.
#[must_use = "call `exit` to restore the previous span and close this one"]
pub struct SpanScope {
    entered: Option<(SpanGuard, Option<Span>)>,
}

impl SpanScope {
    pub fn span(&self) -> Option<&Span> {
        self.entered.as_ref().and_then(|(guard, _)| guard.span())
    }

    /// Restores the span that was current before, then closes this one with
    /// the outcome of `result`.
    pub fn exit<T, E: fmt::Display>(self, tracing: &mut TraceState, result: &Result<T, E>) {
        if let Some((guard, previous)) = self.entered {
            tracing.set_current(previous);
            close(guard, result);
        }
    }
}

fn close<T, E: fmt::Display>(guard: SpanGuard, result: &Result<T, E>) {
    match result {
        Ok(_) => guard.finish(Status::Ok),
        Err(e) => {
            if let Some(span) = guard.span() {
                let _ = span.record_exception(e);
            }
            guard.finish(Status::error(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use opentelemetry::Value;

    use super::*;
    use crate::trace::SpanAttributes;
    use crate::trace::testing::{find, finished, recorder};

    #[tokio::test]
    async fn success_closes_once_with_ok() {
        let (tracer, spans) = recorder();
        let attrs = Attributes::new().with("trace.id", "abc").with_opt("missing", None::<String>);

        let out: Result<u8, String> =
            tracer.with_span(&Context::new(), "work", attrs, async { Ok(7) }).await;

        assert_eq!(out, Ok(7));
        let done = finished(&spans);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, Status::Ok);
        assert_eq!(done[0].span_kind, SpanKind::Internal);
        assert_eq!(done[0].attribute("trace.id"), Some(&Value::from("abc")));
        assert!(done[0].attribute("missing").is_none());
    }

    #[tokio::test]
    async fn error_is_recorded_and_rethrown() {
        let (tracer, spans) = recorder();

        let out: Result<(), String> = tracer
            .with_span(&Context::new(), "work", Attributes::new(), async { Err("boom".to_owned()) })
            .await;

        assert_eq!(out, Err("boom".to_owned()));
        let done = finished(&spans);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, Status::error("boom"));
        assert_eq!(done[0].events.events[0].name, "exception");
    }

    #[tokio::test]
    async fn disabled_tracer_is_a_passthrough() {
        let (tracer, spans) = recorder();
        tracer.set_enabled(false);
        let calls = AtomicUsize::new(0);

        let direct: Result<u8, String> = async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope".to_owned())
        }
        .await;
        let wrapped: Result<u8, String> = tracer
            .with_span(&Context::new(), "work", Attributes::new().with("k", 1i64), async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("nope".to_owned())
            })
            .await;

        assert_eq!(direct, wrapped);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(finished(&spans).is_empty());
        assert!(tracer.start_span("x", SpanKind::Internal, &Context::new()).is_none());
    }

    #[tokio::test]
    async fn toggling_mid_span_still_closes_once() {
        let (tracer, spans) = recorder();
        let handle = tracer.clone();

        let out: Result<(), String> = tracer
            .with_span(&Context::new(), "work", Attributes::new(), async move {
                handle.set_enabled(false);
                Ok(())
            })
            .await;

        assert!(out.is_ok());
        assert!(!tracer.is_enabled());
        assert_eq!(finished(&spans).len(), 1);

        // And the reverse: a call that started disabled opens nothing.
        let handle = tracer.clone();
        let _: Result<(), String> = tracer
            .with_span(&Context::new(), "later", Attributes::new(), async move {
                handle.set_enabled(true);
                Ok(())
            })
            .await;
        assert_eq!(finished(&spans).len(), 1);
    }

    #[tokio::test]
    async fn dropped_work_closes_span_as_cancelled() {
        let (tracer, spans) = recorder();

        let parent = Context::new();
        let pending = tracer.with_span(&parent, "slow", Attributes::new(), async {
            std::future::pending::<Result<(), String>>().await
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(5), pending).await;

        assert!(timed_out.is_err());
        let done = finished(&spans);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, Status::error("cancelled"));
    }

    #[tokio::test]
    async fn child_spans_join_the_parent_trace() {
        let (tracer, spans) = recorder();
        let root = tracer.start_span("root", SpanKind::Server, &Context::new()).unwrap();

        let _: Result<(), String> =
            tracer.with_span(root.context(), "child", Attributes::new(), async { Ok(()) }).await;
        root.end();

        let child = find(&spans, "child");
        assert_eq!(child.span_context.trace_id(), root.trace_id());
        assert_eq!(child.parent_span_id, root.span_id());
    }

    #[test]
    fn entered_span_is_current_until_exit() {
        let (tracer, spans) = recorder();
        let mut tracing = TraceState::default();
        let root = tracer.start_span("root", SpanKind::Server, &Context::new()).unwrap();
        tracing.set_root(root.clone());

        let outer = tracer.enter(&mut tracing, "outer", Attributes::new());
        let outer_id = outer.span().map(Span::span_id);
        assert_eq!(tracing.current().map(Span::span_id), outer_id);

        let inner = tracer.enter(&mut tracing, "inner", Attributes::new());
        inner.exit(&mut tracing, &Ok::<_, String>(()));
        assert_eq!(tracing.current().map(Span::span_id), outer_id);

        outer.exit(&mut tracing, &Err::<(), _>("denied"));
        assert_eq!(tracing.current().map(Span::span_id), Some(root.span_id()));

        let inner = find(&spans, "inner");
        let outer = find(&spans, "outer");
        assert_eq!(Some(inner.parent_span_id), outer_id);
        assert_eq!(outer.parent_span_id, root.span_id());
        assert_eq!(outer.status, Status::error("denied"));
    }

    #[test]
    fn disabled_enter_leaves_the_current_span_alone() {
        let (tracer, spans) = recorder();
        let mut tracing = TraceState::default();
        let root = tracer.start_span("root", SpanKind::Server, &Context::new()).unwrap();
        tracing.set_root(root.clone());
        tracer.set_enabled(false);

        let scope = tracer.enter(&mut tracing, "skipped", Attributes::new());
        assert!(scope.span().is_none());
        scope.exit(&mut tracing, &Ok::<_, String>(()));

        assert_eq!(tracing.current().map(Span::span_id), Some(root.span_id()));
        assert!(finished(&spans).is_empty());
    }
}
