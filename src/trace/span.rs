//! Span handles.
//!
//! A [`Span`] wraps the OpenTelemetry [`Context`] that carries one SDK span,
//! so the Request Context, the handler that opened it, and a [`SpanGuard`]
//! can all refer to the same span. The SDK hands a span to its processor
//! when it ends and ignores everything after that; [`Span`] turns those
//! silent no-ops into [`TraceError::SpanEnded`].

use std::borrow::Cow;
use std::fmt;

use opentelemetry::trace::{SpanContext, SpanId, Status, TraceContextExt, TraceId};
use opentelemetry::{Context, Key, KeyValue, Value};

use crate::error::TraceError;

/// Handle to an open (or closed) span.
#[derive(Clone)]
pub struct Span {
    cx: Context,
    name: Cow<'static, str>,
}

impl Span {
    pub(crate) fn new(cx: Context, name: Cow<'static, str>) -> Self {
        Self { cx, name }
    }

    /// The OpenTelemetry context with this span active. Children opened
    /// under it join the same trace.
    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn span_context(&self) -> SpanContext {
        self.cx.span().span_context().clone()
    }

    pub fn trace_id(&self) -> TraceId {
        self.cx.span().span_context().trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.cx.span().span_context().span_id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets (or overwrites) an attribute. Fails once the span is closed.
    pub fn set_attribute(
        &self,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> Result<(), TraceError> {
        self.ensure_open()?;
        self.cx.span().set_attribute(KeyValue::new(key, value));
        Ok(())
    }

    pub fn set_status(&self, status: Status) -> Result<(), TraceError> {
        self.ensure_open()?;
        self.cx.span().set_status(status);
        Ok(())
    }

    /// Adds an `exception` event carrying the error's message.
    pub fn record_exception(&self, error: &dyn fmt::Display) -> Result<(), TraceError> {
        self.ensure_open()?;
        self.cx
            .span()
            .add_event("exception", vec![KeyValue::new("exception.message", error.to_string())]);
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        !self.cx.span().is_recording()
    }

    /// Closes the span. Returns `false` if it was already closed.
    pub fn end(&self) -> bool {
        if self.is_ended() {
            return false;
        }
        self.cx.span().end();
        true
    }

    fn ensure_open(&self) -> Result<(), TraceError> {
        if self.is_ended() {
            return Err(TraceError::SpanEnded { name: self.name.to_string() });
        }
        Ok(())
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("trace_id", &self.trace_id())
            .field("span_id", &self.span_id())
            .finish_non_exhaustive()
    }
}

/// Closes its span exactly once on every exit path.
///
/// [`finish`](SpanGuard::finish) closes with the given status. If the guard is
/// dropped first (the owning future was cancelled, or a panic unwound through
/// it) the span closes as `Error("cancelled")`.
#[must_use = "dropping the guard immediately closes the span as cancelled"]
pub struct SpanGuard {
    span: Option<Span>,
}

impl SpanGuard {
    pub fn new(span: Span) -> Self {
        Self { span: Some(span) }
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn finish(mut self, status: Status) {
        if let Some(span) = self.span.take() {
            // Already closed elsewhere: nothing left to record.
            let _ = span.set_status(status);
            span.end();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            let _ = span.set_status(Status::error("cancelled"));
            span.end();
        }
    }
}
