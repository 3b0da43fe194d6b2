//! The outermost instrumentation boundary.

use async_trait::async_trait;
use http::StatusCode;

use crate::context::RequestContext;
use crate::error::{HandlerError, TraceError};
use crate::handler::{Handler, Next};
use crate::log::Logger;
use crate::response::Response;
use crate::trace::{Span, SpanGuard, SpanKind, Status, Tracer};

/// Recorded as `user.id` when no identity was attached.
const UNKNOWN_USER: &str = "unknown";

/// Records the request on its root span without ever changing the response.
///
/// On the way in it reuses the request's root span, or opens one named
/// `"{METHOD} {path}"` (a child of the caller's `traceparent`, if any), and sets
/// `http.method` and `url.path`. On the way out it sets `http.status_code`,
/// `user.id` (or `"unknown"`), and `error = true` for 5xx.
///
/// The downstream chain runs exactly once. If writing telemetry fails, the
/// failure is logged and the span is flagged with `error = true`; the
/// response is returned unchanged either way.
pub struct Observability {
    tracer: Tracer,
    logger: Logger,
}

impl Observability {
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer, logger: Logger::new("[observability]") }
    }

    fn on_request(span: &Span, ctx: &RequestContext) -> Result<(), TraceError> {
        span.set_attribute("http.method", ctx.method().as_str().to_owned())?;
        span.set_attribute("url.path", ctx.path().to_owned())?;
        if let Some(addr) = ctx.remote_addr() {
            span.set_attribute("client.address", addr.ip().to_string())?;
        }
        Ok(())
    }

    fn on_response(span: &Span, ctx: &RequestContext, status: StatusCode) -> Result<(), TraceError> {
        span.set_attribute("http.status_code", i64::from(status.as_u16()))?;
        let user = ctx.locals.user().map_or(UNKNOWN_USER, |user| user.id.as_str());
        span.set_attribute("user.id", user.to_owned())?;
        if status.is_server_error() {
            span.set_attribute("error", true)?;
        }
        Ok(())
    }

    fn instrumentation_failed(&self, span: &Span, error: &TraceError) {
        self.logger.error(format!("instrumentation failed: {error}"));
        // The span may be the thing that broke; nothing more to record then.
        let _ = span.set_attribute("error", true);
    }
}

#[async_trait]
impl Handler for Observability {
    fn name(&self) -> &'static str {
        "observability"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HandlerError> {
        if !self.tracer.is_enabled() {
            return Ok(next.run(ctx).await);
        }

        let (span, guard) = match ctx.tracing.root() {
            Some(span) => (span.clone(), None),
            None => {
                let name = format!("{} {}", ctx.method(), ctx.path());
                let parent = ctx.tracing.remote_parent();
                let Some(span) = self.tracer.start_span(name, SpanKind::Server, parent) else {
                    // Disabled between the check above and now.
                    return Ok(next.run(ctx).await);
                };
                ctx.tracing.set_root(span.clone());
                let guard = SpanGuard::new(span.clone());
                (span, Some(guard))
            }
        };

        if let Err(e) = Self::on_request(&span, ctx) {
            self.instrumentation_failed(&span, &e);
        }

        let response = next.run(ctx).await;
        let status = response.status_code();

        if let Err(e) = Self::on_response(&span, ctx, status) {
            self.instrumentation_failed(&span, &e);
        }
        if let Some(guard) = guard {
            let outcome = if status.is_server_error() {
                Status::error(status.to_string())
            } else {
                Status::Unset
            };
            guard.finish(outcome);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::context::Identity;
    use crate::handler::Resolver;
    use crate::sequence::Sequence;
    use opentelemetry::trace::SpanId;
    use opentelemetry::{Context, Value};

    use crate::trace::SpanAttributes;
    use crate::trace::testing::{find, finished, recorder};

    struct Fixed {
        status: StatusCode,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Resolver for Fixed {
        async fn resolve(&self, _ctx: &mut RequestContext) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Response::status(self.status)
        }
    }

    fn fixed(status: StatusCode) -> (Fixed, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Fixed { status, calls: calls.clone() }, calls)
    }

    fn ctx(path: &str) -> RequestContext {
        let request =
            http::Request::builder().method("POST").uri(path).body(Bytes::new()).unwrap();
        RequestContext::new(request)
    }

    #[tokio::test]
    async fn records_request_and_response_attributes() {
        let (tracer, spans) = recorder();
        let (resolver, calls) = fixed(StatusCode::CREATED);
        let pipeline = Sequence::new().with(Observability::new(tracer)).resolve_with(resolver);

        let response = pipeline.handle(&mut ctx("/posts")).await;

        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let span = find(&spans, "POST /posts");
        assert_eq!(span.span_kind, SpanKind::Server);
        assert_eq!(span.attribute("http.method"), Some(&Value::from("POST")));
        assert_eq!(span.attribute("url.path"), Some(&Value::from("/posts")));
        assert_eq!(span.attribute("http.status_code"), Some(&Value::I64(201)));
        assert_eq!(span.attribute("user.id"), Some(&Value::from("unknown")));
        assert!(span.attribute("error").is_none());
        assert_eq!(span.status, Status::Unset);
        assert_eq!(span.parent_span_id, SpanId::INVALID);
    }

    #[tokio::test]
    async fn server_errors_are_flagged() {
        let (tracer, spans) = recorder();
        let (resolver, _) = fixed(StatusCode::BAD_GATEWAY);
        let pipeline = Sequence::new().with(Observability::new(tracer)).resolve_with(resolver);

        pipeline.handle(&mut ctx("/")).await;

        let span = find(&spans, "POST /");
        assert_eq!(span.attribute("error"), Some(&Value::Bool(true)));
        assert!(matches!(span.status, Status::Error { .. }));
    }

    #[tokio::test]
    async fn records_the_attached_user() {
        let (tracer, spans) = recorder();
        let (resolver, _) = fixed(StatusCode::OK);
        let pipeline = Sequence::new().with(Observability::new(tracer)).resolve_with(resolver);

        let mut ctx = ctx("/account");
        ctx.locals
            .attach_user(Identity { id: "u7".into(), role: "user".into(), session_id: "s".into() })
            .unwrap();
        pipeline.handle(&mut ctx).await;

        let span = find(&spans, "POST /account");
        assert_eq!(span.attribute("user.id"), Some(&Value::from("u7")));
    }

    #[tokio::test]
    async fn broken_span_does_not_touch_the_response() {
        let (tracer, spans) = recorder();
        let (resolver, calls) = fixed(StatusCode::ACCEPTED);
        let pipeline =
            Sequence::new().with(Observability::new(tracer.clone())).resolve_with(resolver);

        // A root span someone already closed: every attribute write fails.
        let mut ctx = ctx("/");
        let stale = tracer.start_span("stale", SpanKind::Server, &Context::new()).unwrap();
        stale.end();
        ctx.tracing.set_root(stale);

        let response = pipeline.handle(&mut ctx).await;

        assert_eq!(response.status_code(), StatusCode::ACCEPTED);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(finished(&spans).len(), 1);
    }

    #[tokio::test]
    async fn disabled_tracer_records_nothing() {
        let (tracer, spans) = recorder();
        tracer.set_enabled(false);
        let (resolver, calls) = fixed(StatusCode::OK);
        let pipeline = Sequence::new().with(Observability::new(tracer)).resolve_with(resolver);

        let mut ctx = ctx("/");
        let response = pipeline.handle(&mut ctx).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(finished(&spans).is_empty());
        assert!(ctx.tracing.root().is_none());
    }
}
