use std::time::Instant;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::handler::{Handler, Next};
use crate::log::Logger;
use crate::response::Response;

/// One log line per request, written once the response is known:
///
/// ```text
/// GET /admin -> 301 Moved Permanently in 3ms
/// ```
///
/// Server errors are logged at warn, everything else at info.
pub struct RequestLog {
    logger: Logger,
}

impl RequestLog {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { logger: Logger::new(prefix) }
    }
}

#[async_trait]
impl Handler for RequestLog {
    fn name(&self) -> &'static str {
        "request-log"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<Response, HandlerError> {
        let started = Instant::now();
        let line = format!("{} {}", ctx.method(), ctx.path());

        let response = next.run(ctx).await;

        let status = response.status_code();
        let line = format!("{line} -> {status} in {}ms", started.elapsed().as_millis());
        if status.is_server_error() {
            self.logger.warn(line);
        } else {
            self.logger.info(line);
        }
        Ok(response)
    }
}
