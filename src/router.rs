//! Method + path routing, used as the pipeline's resolver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::context::RequestContext;
use crate::handler::Resolver;
use crate::request::Request;
use crate::response::Response;
use crate::route::{BoxedRoute, Route};

/// The application's routes.
///
/// One radix tree per method. Build it once at startup and hand it to
/// [`Sequence::resolve_with`](crate::Sequence::resolve_with). A path with no
/// route answers `404`; a path routed only under other methods answers `405`.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedRoute>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `route` for `method` and `path`.
    ///
    /// `{name}` segments capture path parameters, read back with
    /// [`Request::param`].
    ///
    /// ```rust
    /// # use http::Method;
    /// # use tollgate::{Request, Response, Router};
    /// # async fn show(_: Request) -> Response { Response::text("") }
    /// # async fn create(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/posts/{slug}", show)
    ///     .on(Method::POST, "/posts",        create);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route pattern or conflicts with one
    /// already registered for `method`. Routes are fixed at startup, so this
    /// fails before the server accepts anything.
    pub fn on(mut self, method: Method, path: &str, route: impl Route) -> Self {
        if let Err(e) = self.routes.entry(method).or_default().insert(path, route.into_boxed_route()) {
            panic!("invalid route `{path}`: {e}");
        }
        self
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedRoute, HashMap<String, String>)> {
        let matched = self.routes.get(method)?.at(path).ok()?;
        let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
        Some((Arc::clone(matched.value), params))
    }

    fn routed_elsewhere(&self, method: &Method, path: &str) -> bool {
        self.routes.iter().any(|(m, tree)| m != method && tree.at(path).is_ok())
    }
}

#[async_trait]
impl Resolver for Router {
    async fn resolve(&self, ctx: &mut RequestContext) -> Response {
        match self.lookup(ctx.method(), ctx.path()) {
            Some((route, params)) => route.call(Request::from_context(ctx, params)).await,
            None if self.routed_elsewhere(ctx.method(), ctx.path()) => {
                Response::status(StatusCode::METHOD_NOT_ALLOWED)
            }
            None => Response::status(StatusCode::NOT_FOUND),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::context::Identity;

    async fn show(req: Request) -> String {
        format!("post {}", req.param("slug").unwrap_or("?"))
    }

    async fn whoami(req: Request) -> Response {
        match req.user() {
            Some(user) => Response::text(user.id.clone()),
            None => Response::status(StatusCode::UNAUTHORIZED),
        }
    }

    fn router() -> Router {
        Router::new().on(Method::GET, "/posts/{slug}", show).on(Method::GET, "/me", whoami)
    }

    fn ctx(method: Method, path: &str) -> RequestContext {
        let request = http::Request::builder().method(method).uri(path).body(Bytes::new()).unwrap();
        RequestContext::new(request)
    }

    #[tokio::test]
    async fn captures_path_params() {
        let response = router().resolve(&mut ctx(Method::GET, "/posts/hello")).await;
        assert_eq!(response.body(), &Bytes::from_static(b"post hello"));
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_wrong_method_is_405() {
        let router = router();
        let missing = router.resolve(&mut ctx(Method::GET, "/nope")).await;
        let wrong = router.resolve(&mut ctx(Method::DELETE, "/posts/hello")).await;
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(wrong.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn routes_see_the_attached_user() {
        let router = router();
        let mut ctx = ctx(Method::GET, "/me");
        assert_eq!(router.resolve(&mut ctx).await.status_code(), StatusCode::UNAUTHORIZED);

        ctx.locals
            .attach_user(Identity { id: "u1".into(), role: "user".into(), session_id: "s".into() })
            .unwrap();
        assert_eq!(router.resolve(&mut ctx).await.body(), &Bytes::from_static(b"u1"));
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_panic_at_startup() {
        let _ = Router::new()
            .on(Method::GET, "/posts/{slug}", show)
            .on(Method::GET, "/posts/{id}", show);
    }
}
