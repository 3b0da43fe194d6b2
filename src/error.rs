//! Error types.
//!
//! Application-level failures (404, redirects, etc.) are expressed as
//! [`Response`](crate::Response) values, never as errors. The types here cover
//! the pipeline's own failure classes: infrastructure, handler, identity
//! provider, instrumentation, exporter setup, and configuration.

use std::time::Duration;

/// Server infrastructure failures: binding to a port or parsing the address.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`")]
    InvalidAddress { addr: String },
}

/// Anything a pipeline handler can fail with.
///
/// A handler that returns one of these never reaches the transport layer: the
/// sequence contains it, logs it, and answers `500 Internal Server Error`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("identity provider: {0}")]
    Provider(#[from] ProviderError),

    #[error("identity already attached to request (user {existing})")]
    IdentityConflict { existing: String },

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Failures raised by an [`IdentityProvider`](crate::identity::IdentityProvider).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("provider call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("provider internal error: {0}")]
    Internal(String),
}

/// Instrumentation misuse. Never turned into a failed response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("span `{name}` is already closed")]
    SpanEnded { name: String },
}

/// The OTLP exporter could not be set up. Raised once, at startup; export
/// failures after that are logged by the SDK and never reach a request.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cannot build OTLP exporter: {0}")]
    Build(#[from] opentelemetry_otlp::ExporterBuildError),
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be an unsigned integer, got `{value}`")]
    NotANumber { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}
