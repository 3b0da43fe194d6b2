//! Process configuration loaded from environment variables.
//!
//! Read once at startup. Nothing here changes while requests are in flight,
//! apart from the tracer's enable flag which lives on the [`Tracer`](crate::trace::Tracer).

use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318/v1/traces";
const DEFAULT_SERVICE_NAME: &str = "tollgate";
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BATCH_SIZE: u64 = 512;
const DEFAULT_QUEUE_CAPACITY: u64 = 2_048;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 10_000;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// `EnvFilter` directive string, e.g. `info` or `tollgate=debug`.
    pub log_filter: String,
    pub tracing: TracingConfig,
    pub auth: AuthConfig,
}

/// Span tracer and OTLP export settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Master switch. When false the tracer creates no spans at all.
    pub enabled: bool,
    pub endpoint: String,
    pub service_name: String,
    pub batch_size: usize,
    pub queue_capacity: usize,
    pub flush_interval: Duration,
    pub export_timeout: Duration,
}

/// Identity-provider call bounds.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Upper bound on each `handle_request` / `get_session` call.
    pub provider_timeout: Duration,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: DEFAULT_OTLP_ENDPOINT.to_owned(),
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            batch_size: DEFAULT_BATCH_SIZE as usize,
            queue_capacity: DEFAULT_QUEUE_CAPACITY as usize,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            export_timeout: Duration::from_millis(DEFAULT_EXPORT_TIMEOUT_MS),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { provider_timeout: Duration::from_millis(DEFAULT_PROVIDER_TIMEOUT_MS) }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            tracing: TracingConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("OBSERVABILITY_ENABLED")
            .or_else(|| lookup("PUBLIC_OBSERVABILITY_ENABLED"))
            .is_some_and(|v| v == "true");

        let tracing = TracingConfig {
            enabled,
            endpoint: lookup("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_owned()),
            service_name: lookup("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_owned()),
            batch_size: positive(&lookup, "TRACE_EXPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE)? as usize,
            queue_capacity: positive(&lookup, "TRACE_EXPORT_QUEUE", DEFAULT_QUEUE_CAPACITY)? as usize,
            flush_interval: Duration::from_millis(positive(
                &lookup,
                "TRACE_EXPORT_INTERVAL_MS",
                DEFAULT_FLUSH_INTERVAL_MS,
            )?),
            export_timeout: Duration::from_millis(positive(
                &lookup,
                "TRACE_EXPORT_TIMEOUT_MS",
                DEFAULT_EXPORT_TIMEOUT_MS,
            )?),
        };

        let auth = AuthConfig {
            provider_timeout: Duration::from_millis(number(
                &lookup,
                "AUTH_PROVIDER_TIMEOUT_MS",
                DEFAULT_PROVIDER_TIMEOUT_MS,
            )?),
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned()),
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned()),
            tracing,
            auth,
        })
    }
}

fn number<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::NotANumber { var, value }),
    }
}

/// Like [`number`], but zero is rejected.
fn positive<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match number(lookup, var, default)? {
        0 => Err(ConfigError::Zero { var }),
        n => Ok(n),
    }
}
