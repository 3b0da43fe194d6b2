//! Route trait and type erasure.
//!
//! # How async routes are stored
//!
//! The [`Router`](crate::Router) holds routes of *different* types in one
//! `HashMap<Method, Tree>`, so each route is hidden behind a trait object
//! (`dyn ErasedRoute`):
//!
//! ```text
//! async fn admin(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.on(Method::GET, "/admin", admin)
//! admin.into_boxed_route()                         ← Route blanket impl
//!        ↓
//! Arc::new(FnRoute(admin))                         ← stored as BoxedRoute
//!        ↓
//! route.call(req)  at request time                 ← one vtable dispatch
//!        ↓
//! Box::pin(async { admin(req).await.into_response() })
//! ```

use std::sync::Arc;

use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Route` trait's `into_boxed_route` method.
#[doc(hidden)]
pub trait ErasedRoute {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

#[doc(hidden)]
pub type BoxedRoute = Arc<dyn ErasedRoute + Send + Sync + 'static>;

/// Implemented for every valid route.
///
/// You never implement this yourself. It is satisfied by any function of the
/// shape:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// Sealed via the private `Sealed` supertrait so only the blanket impl applies.
pub trait Route: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_route(self) -> BoxedRoute;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Route for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_route(self) -> BoxedRoute {
        Arc::new(FnRoute(self))
    }
}

/// Bridges a concrete route function to the trait-object world.
struct FnRoute<F>(F);

impl<F, Fut, R> ErasedRoute for FnRoute<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
