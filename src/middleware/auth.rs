//! Hands the request to the identity provider first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AuthConfig;
use crate::context::RequestContext;
use crate::error::{HandlerError, ProviderError};
use crate::handler::{Handler, Next};
use crate::identity::{Delegation, IdentityProvider};
use crate::log::Logger;
use crate::response::Response;
use crate::trace::{Attributes, Tracer};

/// Lets the [`IdentityProvider`] answer its own routes, and continues the
/// pipeline for everything it defers.
///
/// The delegation runs inside an `auth-handle` span tagged with `trace.id`.
/// On deferral that span stays the request's current span while the rest of
/// the chain runs. The provider call is bounded by a timeout. Any provider failure is
/// returned as a [`HandlerError`], which the pipeline turns into an opaque
/// `500 Internal Server Error`.
pub struct AuthDelegate<P> {
    provider: Arc<P>,
    tracer: Tracer,
    logger: Logger,
    timeout: Duration,
}

impl<P: IdentityProvider> AuthDelegate<P> {
    pub fn new(provider: Arc<P>, tracer: Tracer) -> Self {
        Self {
            provider,
            tracer,
            logger: Logger::new("[auth]"),
            timeout: AuthConfig::default().provider_timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn delegate(&self, ctx: &RequestContext) -> Result<Delegation, ProviderError> {
        tokio::time::timeout(self.timeout, self.provider.handle_request(ctx))
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl<P: IdentityProvider> Handler for AuthDelegate<P> {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HandlerError> {
        let trace_id = ctx.tracing.trace_id().map(|id| id.to_string());
        let attrs = Attributes::new().with_opt("trace.id", trace_id);

        self.logger.debug(format!("handle start: {} {}", ctx.method(), ctx.path()));

        // Current for the rest of the chain, so later spans nest under it.
        let scope = self.tracer.enter(&mut ctx.tracing, "auth-handle", attrs);
        let outcome: Result<Response, ProviderError> = match self.delegate(ctx).await {
            Ok(Delegation::Respond(response)) => {
                self.logger.info(format!(
                    "provider answered {} with {}",
                    ctx.path(),
                    response.status_code()
                ));
                Ok(response)
            }
            Ok(Delegation::Defer) => Ok(next.run(ctx).await),
            Err(e) => Err(e),
        };
        scope.exit(&mut ctx.tracing, &outcome);
        let response = outcome?;

        self.logger.debug(format!("handle done: {}", response.status_code()));
        Ok(response)
    }
}
