//! # tollgate
//!
//! A small hyper server whose every request passes through one ordered
//! pipeline of cross-cutting handlers before the application sees it:
//! tracing, request logging, identity-provider delegation, and session
//! extraction.
//!
//! ## The pipeline
//!
//! ```text
//! request → Observability → RequestLog → AuthDelegate → SessionExtractor → Router
//!                                                                            │
//! response ← ─────────────── (same handlers, in reverse) ─────────────────── ┘
//! ```
//!
//! - A handler either calls [`Next::run`] once or answers by itself, which
//!   skips everything after it.
//! - A handler that fails or panics is contained: the client gets an opaque
//!   `500 Internal Server Error` and the handlers further out still record it.
//! - Telemetry never changes a response. With tracing disabled, every span
//!   wrapper is a plain `await`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use http::{Method, StatusCode};
//! use tollgate::middleware::{AuthDelegate, Observability, SessionExtractor};
//! use tollgate::{MemoryProvider, Request, Response, Router, Sequence, Server, Tracer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tollgate::Error> {
//!     let tracer = Tracer::disabled();
//!     let provider = Arc::new(MemoryProvider::new());
//!
//!     let app = Router::new().on(Method::GET, "/admin", admin);
//!     let pipeline = Sequence::new()
//!         .with(Observability::new(tracer.clone()))
//!         .with(AuthDelegate::new(provider.clone(), tracer.clone()))
//!         .with(SessionExtractor::new(provider, tracer))
//!         .resolve_with(app);
//!
//!     Server::bind("0.0.0.0:3000").serve(pipeline).await
//! }
//!
//! async fn admin(req: Request) -> Response {
//!     match req.user() {
//!         Some(user) if user.is_admin() => Response::text("welcome"),
//!         Some(_) => Response::redirect(StatusCode::MOVED_PERMANENTLY, "/"),
//!         None => Response::redirect(StatusCode::MOVED_PERMANENTLY, "/login"),
//!     }
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod log;
pub mod middleware;
pub mod trace;

mod handler;
mod request;
mod response;
mod route;
mod router;
mod sequence;
mod server;

pub use config::Config;
pub use context::{Identity, Locals, RequestContext};
pub use error::{Error, HandlerError, ProviderError};
pub use handler::{BoxFuture, Handler, Next, Resolver};
pub use identity::{Delegation, IdentityProvider, MemoryProvider, Session};
pub use log::Logger;
pub use middleware::{AuthDelegate, Observability, RequestLog, SessionExtractor};
pub use request::Request;
pub use response::{ContentType, INTERNAL_ERROR_BODY, IntoResponse, Response, ResponseBuilder};
pub use route::Route;
pub use router::Router;
pub use sequence::{Pipeline, Sequence};
pub use server::Server;
pub use trace::{Attributes, Span, Tracer};
