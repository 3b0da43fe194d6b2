//! Built-in pipeline handlers.
//!
//! The usual order, outermost first:
//!
//! ```text
//! Observability → RequestLog → AuthDelegate → SessionExtractor → resolver
//! ```
//!
//! [`Observability`] goes first so its span covers everything after it and
//! sees the final status, including contained failures.

mod auth;
mod observe;
mod request_log;
mod session;

pub use auth::AuthDelegate;
pub use observe::Observability;
pub use request_log::RequestLog;
pub use session::SessionExtractor;
