//! The identity-provider seam.
//!
//! The pipeline talks to whatever owns users and sessions through
//! [`IdentityProvider`]. The provider can answer its own endpoints (sign-out,
//! OAuth callbacks, ...) by returning [`Delegation::Respond`], or let the
//! request continue with [`Delegation::Defer`].

use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::context::{Identity, RequestContext};
use crate::error::ProviderError;
use crate::response::Response;

mod memory;

pub use memory::{MemoryProvider, SESSION_COOKIE};

/// What the provider decided to do with a request.
#[derive(Debug)]
pub enum Delegation {
    /// The provider answered; the rest of the pipeline does not run.
    Respond(Response),
    /// Not the provider's business; continue down the pipeline.
    Defer,
}

/// Session metadata returned alongside the user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

/// A successful session lookup.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: Identity,
    pub session: SessionInfo,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Gives the provider first look at the request.
    async fn handle_request(&self, ctx: &RequestContext) -> Result<Delegation, ProviderError>;

    /// Resolves the session carried by the request's credentials, if any.
    /// `Ok(None)` means anonymous, which is not an error.
    async fn get_session(&self, headers: &HeaderMap) -> Result<Option<Session>, ProviderError>;
}
