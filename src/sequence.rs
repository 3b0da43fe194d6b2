//! Composing handlers into one.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::handler::{Handler, Next, Resolver};
use crate::response::Response;

/// An ordered list of handlers.
///
/// Order is the order of [`with`](Sequence::with) calls. A sequence is a
/// [`Handler`] itself, so one sequence can be dropped into another and its
/// handlers run in place, followed by whatever came after it in the outer one.
///
/// ```rust
/// use tollgate::{RequestLog, Sequence};
///
/// let inner = Sequence::new().with(RequestLog::new("[inner]"));
/// let outer = Sequence::new().with(RequestLog::new("[outer]")).with(inner);
/// assert_eq!(outer.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Sequence {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl Handler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Binds the innermost step and freezes the order.
    pub fn resolve_with(self, resolver: impl Resolver) -> Pipeline {
        Pipeline { handlers: self.handlers.into(), resolver: Arc::new(resolver) }
    }
}

#[async_trait]
impl Handler for Sequence {
    fn name(&self) -> &'static str {
        "sequence"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HandlerError> {
        Ok(Next::nested(&self.handlers, next).run(ctx).await)
    }
}

/// A sequence bound to its resolver: the single callable the server runs for
/// every request.
///
/// Holds no per-request state. Clones share the same handlers.
#[derive(Clone)]
pub struct Pipeline {
    handlers: Arc<[Arc<dyn Handler>]>,
    resolver: Arc<dyn Resolver>,
}

impl Pipeline {
    pub async fn handle(&self, ctx: &mut RequestContext) -> Response {
        Next::new(&self.handlers, self.resolver.as_ref()).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;
    use parking_lot::Mutex;

    use super::*;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Step {
        label: &'static str,
        journal: Journal,
        stop: bool,
    }

    #[async_trait]
    impl Handler for Step {
        async fn handle(
            &self,
            ctx: &mut RequestContext,
            next: Next<'_>,
        ) -> Result<Response, HandlerError> {
            self.journal.lock().push(format!("{} in", self.label));
            if self.stop {
                return Ok(Response::status(StatusCode::FORBIDDEN));
            }
            let response = next.run(ctx).await;
            self.journal.lock().push(format!("{} out", self.label));
            Ok(response)
        }
    }

    struct Tail(Journal);

    #[async_trait]
    impl Resolver for Tail {
        async fn resolve(&self, _ctx: &mut RequestContext) -> Response {
            self.0.lock().push("resolve".to_owned());
            Response::text("done")
        }
    }

    fn step(label: &'static str, journal: &Journal) -> Step {
        Step { label, journal: journal.clone(), stop: false }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(http::Request::new(Bytes::new()))
    }

    #[tokio::test]
    async fn nested_sequences_run_in_place() {
        let journal = Journal::default();
        let inner = Sequence::new().with(step("b", &journal)).with(step("c", &journal));
        let pipeline = Sequence::new()
            .with(step("a", &journal))
            .with(inner)
            .with(step("d", &journal))
            .resolve_with(Tail(journal.clone()));

        let response = pipeline.handle(&mut ctx()).await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(
            *journal.lock(),
            ["a in", "b in", "c in", "d in", "resolve", "d out", "c out", "b out", "a out"]
        );
    }

    #[tokio::test]
    async fn short_circuit_inside_nested_sequence_skips_outer_rest() {
        let journal = Journal::default();
        let inner = Sequence::new().with(Step { label: "b", journal: journal.clone(), stop: true });
        let pipeline = Sequence::new()
            .with(step("a", &journal))
            .with(inner)
            .with(step("c", &journal))
            .resolve_with(Tail(journal.clone()));

        let response = pipeline.handle(&mut ctx()).await;

        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(*journal.lock(), ["a in", "b in", "a out"]);
    }

    #[tokio::test]
    async fn empty_sequence_goes_straight_to_resolver() {
        let journal = Journal::default();
        let pipeline = Sequence::new().resolve_with(Tail(journal.clone()));

        let response = pipeline.clone().handle(&mut ctx()).await;

        assert_eq!(response.body(), &Bytes::from_static(b"done"));
        assert_eq!(*journal.lock(), ["resolve"]);
    }
}
