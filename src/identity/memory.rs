//! Cookie-backed, in-process session store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::RwLock;

use super::{Delegation, IdentityProvider, Session, SessionInfo};
use crate::context::{Identity, RequestContext};
use crate::error::ProviderError;
use crate::response::Response;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "tollgate.session_token";

const DEFAULT_BASE_PATH: &str = "/api/auth";
const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct Stored {
    session: Session,
    expires_at: Instant,
}

/// Sessions held in memory, keyed by an opaque token.
///
/// Answers two endpoints under its base path (default `/api/auth`):
///
/// | Route | Response |
/// |---|---|
/// | `GET  {base}/get-session` | the session as JSON, or `null` |
/// | `POST {base}/sign-out` | revokes the session and clears the cookie |
///
/// Other paths under the base get `404`; everything else is deferred.
pub struct MemoryProvider {
    base_path: String,
    ttl: Duration,
    sessions: RwLock<HashMap<String, Stored>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_owned(),
            ttl: DEFAULT_TTL,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Opens a session for `user_id` and returns its token.
    pub fn create_session(&self, user_id: impl Into<String>, role: impl Into<String>) -> (String, Session) {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session {
            user: Identity { id: user_id.into(), role: role.into(), session_id: session_id.clone() },
            session: SessionInfo { id: session_id },
        };
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        // Sweep expired entries, including ones whose token never comes back.
        sessions.retain(|_, stored| stored.expires_at > now);
        sessions.insert(token.clone(), Stored { session: session.clone(), expires_at: now + self.ttl });
        (token, session)
    }

    /// Drops a session. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// `Cookie` header value presenting `token`.
    pub fn cookie_header(token: &str) -> String {
        format!("{SESSION_COOKIE}={token}")
    }

    fn lookup(&self, headers: &HeaderMap) -> Option<Session> {
        let token = session_token(headers)?;
        {
            let sessions = self.sessions.read();
            let stored = sessions.get(&token)?;
            if stored.expires_at > Instant::now() {
                return Some(stored.session.clone());
            }
        }
        self.sessions.write().remove(&token);
        None
    }

    fn get_session_response(&self, headers: &HeaderMap) -> Result<Response, ProviderError> {
        let body = serde_json::to_vec(&self.lookup(headers))
            .map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(Response::json(body))
    }

    fn sign_out_response(&self, headers: &HeaderMap) -> Response {
        if let Some(token) = session_token(headers) {
            self.revoke(&token);
        }
        Response::builder()
            .header(
                SET_COOKIE.as_str(),
                &format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"),
            )
            .json(br#"{"success":true}"#.to_vec())
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryProvider {
    async fn handle_request(&self, ctx: &RequestContext) -> Result<Delegation, ProviderError> {
        let Some(rest) = ctx.path().strip_prefix(self.base_path.as_str()) else {
            return Ok(Delegation::Defer);
        };
        // `/api/authors` is not ours.
        if !rest.is_empty() && !rest.starts_with('/') {
            return Ok(Delegation::Defer);
        }

        let response = match (ctx.method(), rest) {
            (&Method::GET, "/get-session") => self.get_session_response(ctx.headers())?,
            (&Method::POST, "/sign-out") => self.sign_out_response(ctx.headers()),
            _ => Response::status(StatusCode::NOT_FOUND),
        };
        Ok(Delegation::Respond(response))
    }

    async fn get_session(&self, headers: &HeaderMap) -> Result<Option<Session>, ProviderError> {
        Ok(self.lookup(headers))
    }
}

/// Finds the session cookie across every `Cookie` header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_owned())
        .filter(|value| !value.is_empty())
}
