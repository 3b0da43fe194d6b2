//! The request as seen by a route.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::context::{Identity, RequestContext};

/// An owned snapshot of the request handed to a route, taken after every
/// pipeline handler has run. Cloning the body is a refcount bump.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    user: Option<Identity>,
}

impl Request {
    pub(crate) fn from_context(ctx: &RequestContext, params: HashMap<String, String>) -> Self {
        let request = ctx.request();
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            body: request.body().clone(),
            params,
            user: ctx.locals.user().cloned(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Header lookup (names are case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/blog/post/{slug}`, `req.param("slug")` on
    /// `/blog/post/hello` returns `Some("hello")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The identity the session extractor attached, if any.
    pub fn user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }
}
