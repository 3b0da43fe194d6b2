//! Resolves the request's session and publishes the user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{HandlerError, ProviderError};
use crate::handler::{Handler, Next};
use crate::identity::{IdentityProvider, Session};
use crate::log::Logger;
use crate::response::Response;
use crate::trace::{Attributes, Tracer};

/// Looks up the session behind the request's credentials and attaches its
/// user to [`Locals`](crate::context::Locals) before anything downstream runs.
///
/// Anonymous requests pass through untouched. The lookup happens at most
/// once per request and its result is never shared across requests. A failed
/// or timed-out lookup is a [`HandlerError`] and is contained like any other.
pub struct SessionExtractor<P> {
    provider: Arc<P>,
    tracer: Tracer,
    logger: Logger,
    timeout: Duration,
}

impl<P: IdentityProvider> SessionExtractor<P> {
    pub fn new(provider: Arc<P>, tracer: Tracer) -> Self {
        Self {
            provider,
            tracer,
            logger: Logger::new("[session]"),
            timeout: AuthConfig::default().provider_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn lookup(&self, ctx: &RequestContext) -> Result<Option<Session>, ProviderError> {
        let attrs = Attributes::new()
            .with_opt("trace.id", ctx.tracing.trace_id().map(|id| id.to_string()));
        let parent = ctx.tracing.parent();
        let lookup = async {
            tokio::time::timeout(self.timeout, self.provider.get_session(ctx.headers()))
                .await
                .map_err(|_| ProviderError::Timeout(self.timeout))?
        };
        self.tracer.with_span(&parent, "session-lookup", attrs, lookup).await
    }
}

#[async_trait]
impl<P: IdentityProvider> Handler for SessionExtractor<P> {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HandlerError> {
        let session = match ctx.cached_session() {
            Some(cached) => cached.clone(),
            None => {
                let session = self.lookup(ctx).await?;
                ctx.cache_session(session.clone());
                session
            }
        };

        if let Some(Session { user, session }) = session {
            self.logger.debug(format!("session {} belongs to {}", session.id, user.id));
            ctx.locals.attach_user(user)?;
            if let Some(span) = ctx.tracing.current() {
                if let Err(e) = span.set_attribute("session.id", session.id) {
                    self.logger.warn(format!("could not tag span: {e}"));
                }
            }
        }

        Ok(next.run(ctx).await)
    }
}
