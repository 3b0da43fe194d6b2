//! Span tracing on top of the OpenTelemetry SDK.
//!
//! The tracer is explicit: handlers receive the current span through the
//! [`RequestContext`](crate::RequestContext), never through the ambient
//! OpenTelemetry context. Spans are batched by the SDK's
//! `BatchSpanProcessor` and exported over OTLP/HTTP off the request path, so
//! a slow or missing collector never holds up a response.
//!
//! - [`Tracer`]: enable flag, [`Tracer::with_span`] and [`Tracer::enter`]
//! - [`Span`] / [`SpanGuard`]: attribute writes, exactly-once close
//! - [`extract_remote_parent`]: W3C `traceparent` on inbound requests

mod attr;
mod propagation;
mod span;
mod tracer;

#[cfg(test)]
pub(crate) mod testing;

pub use attr::{Attributes, SpanAttributes};
pub use opentelemetry::trace::{SpanKind, Status};
pub use propagation::extract_remote_parent;
pub use span::{Span, SpanGuard};
pub use tracer::{SpanScope, Tracer};
