//! Pipeline handlers, the continuation they receive, and the containment
//! boundary every handler runs behind.
//!
//! # Shape of a call
//!
//! ```text
//! H(ctx) = h1(ctx, next₁)
//!          next₁.run(ctx) = h2(ctx, next₂)
//!                           …
//!                           nextₙ.run(ctx) = resolver.resolve(ctx)
//! ```
//!
//! [`Next`] is consumed by [`Next::run`], so a handler can continue the chain
//! at most once. Returning without calling it short-circuits: nothing
//! downstream runs.
//!
//! # Containment
//!
//! Each handler (and the resolver) is invoked through one boundary. A
//! returned [`HandlerError`] or a panic stops there: it is logged with its
//! cause chain and replaced by `500 Internal Server Error`. Handlers further
//! out see an ordinary response, so outer instrumentation still records it.

use std::any::Any;
use std::error::Error as _;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::log::Logger;
use crate::response::Response;

/// A heap-allocated, type-erased future.
///
/// `Send` so tokio can move request tasks between worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of the pipeline.
///
/// Handlers hold no per-request state; whatever they learn goes into the
/// [`RequestContext`]. Return `Err` for failures: the pipeline contains them.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Log prefix used when this handler's failure is contained.
    fn name(&self) -> &'static str {
        "handler"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HandlerError>;
}

/// The application's own request resolution, invoked as the innermost step.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, ctx: &mut RequestContext) -> Response;
}

/// The rest of the pipeline after the current handler.
pub struct Next<'a> {
    handlers: &'a [Arc<dyn Handler>],
    tail: Tail<'a>,
}

enum Tail<'a> {
    Resolver(&'a dyn Resolver),
    /// Continuation of an enclosing sequence, for nested sequences.
    Outer(Box<Next<'a>>),
}

impl<'a> Next<'a> {
    pub(crate) fn new(handlers: &'a [Arc<dyn Handler>], resolver: &'a dyn Resolver) -> Self {
        Self { handlers, tail: Tail::Resolver(resolver) }
    }

    pub(crate) fn nested(handlers: &'a [Arc<dyn Handler>], outer: Next<'a>) -> Self {
        Self { handlers, tail: Tail::Outer(Box::new(outer)) }
    }

    /// Runs the remaining handlers and the resolver, returning their response.
    pub fn run<'b>(self, ctx: &'b mut RequestContext) -> BoxFuture<'b, Response>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let handlers = self.handlers;
            match handlers.split_first() {
                Some((head, rest)) => {
                    let next = Next { handlers: rest, tail: self.tail };
                    contain(head.name(), head.handle(ctx, next)).await
                }
                None => match self.tail {
                    Tail::Resolver(resolver) => {
                        contain("resolve", async { Ok(resolver.resolve(ctx).await) }).await
                    }
                    Tail::Outer(outer) => outer.run(ctx).await,
                },
            }
        })
    }
}

// ── Containment ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct FailureDetail<'a> {
    handler: &'a str,
    error: String,
    causes: Vec<String>,
}

impl<'a> FailureDetail<'a> {
    fn of(handler: &'a str, error: &HandlerError) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self { handler, error: format!("{error:?}"), causes }
    }
}

/// Runs `work`, turning an `Err` or a panic into the generic 500.
pub(crate) async fn contain<F>(name: &'static str, work: F) -> Response
where
    F: Future<Output = Result<Response, HandlerError>>,
{
    let error = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(response)) => return response,
        Ok(Err(error)) => error,
        Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
    };

    let logger = Logger::new(format!("[{name}]"));
    logger.error(format!("failed: {error}"));
    logger.debug_with("failure detail", &FailureDetail::of(name, &error));
    Response::internal_error()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
