//! Per-request state threaded through every handler.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use opentelemetry::Context;
use opentelemetry::trace::{TraceContextExt, TraceId};
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::identity::Session;
use crate::trace::{Span, extract_remote_parent};

/// The resolved user behind a request.
///
/// Built whole from a session lookup; there is no way to attach half of one.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub role: String,
    pub session_id: String,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Values handlers publish for the handlers and resolver after them.
#[derive(Debug, Default)]
pub struct Locals {
    user: Option<Identity>,
}

impl Locals {
    pub fn user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }

    /// Publishes the request's identity. Once set it cannot be replaced;
    /// attaching the same identity again is a no-op.
    pub fn attach_user(&mut self, user: Identity) -> Result<(), HandlerError> {
        match &self.user {
            None => {
                self.user = Some(user);
                Ok(())
            }
            Some(existing) if *existing == user => Ok(()),
            Some(existing) => Err(HandlerError::IdentityConflict { existing: existing.id.clone() }),
        }
    }
}

/// The request's spans: the root (request) span and the innermost open one.
#[derive(Debug, Default)]
pub struct TraceState {
    root: Option<Span>,
    current: Option<Span>,
    remote_parent: Context,
}

impl TraceState {
    pub fn root(&self) -> Option<&Span> {
        self.root.as_ref()
    }

    /// The innermost span a handler should annotate or parent under.
    pub fn current(&self) -> Option<&Span> {
        self.current.as_ref().or(self.root.as_ref())
    }

    pub fn set_root(&mut self, span: Span) {
        self.current.get_or_insert_with(|| span.clone());
        self.root = Some(span);
    }

    pub fn set_current(&mut self, span: Option<Span>) {
        self.current = span;
    }

    /// Makes `span` current and hands back whatever was current before.
    pub(crate) fn replace_current(&mut self, span: Span) -> Option<Span> {
        self.current.replace(span)
    }

    /// Parent for a new span: the current span, else the caller's `traceparent`.
    /// Empty when there is neither.
    pub fn parent(&self) -> Context {
        match self.current() {
            Some(span) => span.context().clone(),
            None => self.remote_parent.clone(),
        }
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        let parent = self.parent();
        let span = parent.span();
        let context = span.span_context();
        context.is_valid().then(|| context.trace_id())
    }

    pub fn remote_parent(&self) -> &Context {
        &self.remote_parent
    }
}

/// Everything the pipeline knows about one in-flight request.
///
/// Created by the server for each request and dropped once the response is
/// written. A context is never shared between requests; handlers get it by
/// `&mut` one at a time, in pipeline order.
#[derive(Debug)]
pub struct RequestContext {
    request: http::Request<Bytes>,
    remote_addr: Option<SocketAddr>,
    pub locals: Locals,
    pub tracing: TraceState,
    session: Option<Option<Session>>,
}

impl RequestContext {
    pub fn new(request: http::Request<Bytes>) -> Self {
        let remote_parent = extract_remote_parent(request.headers());
        Self {
            request,
            remote_addr: None,
            locals: Locals::default(),
            tracing: TraceState { remote_parent, ..TraceState::default() },
            session: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn request(&self) -> &http::Request<Bytes> {
        &self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn url(&self) -> &Uri {
        self.request.uri()
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.request.headers()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Session lookup result memoized for this request only.
    /// `None` means no lookup has happened yet.
    pub(crate) fn cached_session(&self) -> Option<&Option<Session>> {
        self.session.as_ref()
    }

    pub(crate) fn cache_session(&mut self, session: Option<Session>) {
        self.session = Some(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str) -> Identity {
        Identity { id: id.to_owned(), role: "user".to_owned(), session_id: "s1".to_owned() }
    }

    fn ctx(request: http::Request<Bytes>) -> RequestContext {
        RequestContext::new(request)
    }

    #[test]
    fn user_attaches_once() {
        let mut locals = Locals::default();
        assert!(locals.user().is_none());

        locals.attach_user(identity("u1")).unwrap();
        locals.attach_user(identity("u1")).unwrap();
        let err = locals.attach_user(identity("u2")).unwrap_err();

        assert!(matches!(err, HandlerError::IdentityConflict { existing } if existing == "u1"));
        assert_eq!(locals.user().unwrap().id, "u1");
    }

    #[test]
    fn admin_role_check() {
        let mut user = identity("u1");
        assert!(!user.is_admin());
        user.role = "admin".to_owned();
        assert!(user.is_admin());
    }

    #[test]
    fn traceparent_becomes_remote_parent() {
        let request = http::Request::builder()
            .uri("/blog?page=2")
            .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .body(Bytes::new())
            .unwrap();
        let ctx = ctx(request);

        assert_eq!(ctx.path(), "/blog");
        assert_eq!(ctx.url().query(), Some("page=2"));
        assert_eq!(
            ctx.tracing.trace_id().map(|id| id.to_string()).as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
        assert!(ctx.tracing.root().is_none());
    }

    #[test]
    fn no_trace_without_spans_or_header() {
        let ctx = ctx(http::Request::new(Bytes::new()));
        assert!(ctx.tracing.trace_id().is_none());
        assert!(!ctx.tracing.parent().has_active_span());
        assert!(ctx.cached_session().is_none());
    }
}
