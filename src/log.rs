//! Structured logger and the line format it renders to.
//!
//! Every line looks like:
//!
//! ```text
//! ℹ [auth] 2026-10-18T09:14:03.271Z handle start GET /admin
//! ```
//!
//! [`Logger`] is a thin handle (one `Arc<str>` prefix) over `tracing` events,
//! so it is cheap to clone into every handler. [`init`] installs the
//! subscriber that renders the symbol/prefix/timestamp layout.

use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const RESET: &str = "\x1b[0m";
const TIME_COLOR: &str = "\x1b[32m";

// ── Logger ────────────────────────────────────────────────────────────────────

/// Emits one event per call, tagged with a caller-chosen prefix.
///
/// Non-string payloads go through the `*_with` methods: the message is written
/// first, then the payload as its own JSON line.
#[derive(Debug, Clone)]
pub struct Logger {
    prefix: Arc<str>,
}

macro_rules! emit {
    ($macro:ident, $prefix:expr, $msg:expr) => {
        tracing::$macro!(target: "tollgate", prefix = %$prefix, "{}", $msg)
    };
}

impl Logger {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: Arc::from(prefix.into()) }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn trace(&self, msg: impl fmt::Display) {
        emit!(trace, self.prefix, msg);
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        emit!(debug, self.prefix, msg);
    }

    pub fn info(&self, msg: impl fmt::Display) {
        emit!(info, self.prefix, msg);
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        emit!(warn, self.prefix, msg);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        emit!(error, self.prefix, msg);
    }

    pub fn debug_with<T: Serialize>(&self, msg: impl fmt::Display, entry: &T) {
        self.debug(msg);
        emit!(debug, self.prefix, entry_line(entry));
    }

    pub fn info_with<T: Serialize>(&self, msg: impl fmt::Display, entry: &T) {
        self.info(msg);
        emit!(info, self.prefix, entry_line(entry));
    }

    pub fn warn_with<T: Serialize>(&self, msg: impl fmt::Display, entry: &T) {
        self.warn(msg);
        emit!(warn, self.prefix, entry_line(entry));
    }

    pub fn error_with<T: Serialize>(&self, msg: impl fmt::Display, entry: &T) {
        self.error(msg);
        emit!(error, self.prefix, entry_line(entry));
    }
}

fn entry_line<T: Serialize>(entry: &T) -> String {
    serde_json::to_string(entry).unwrap_or_else(|e| format!("<unserializable entry: {e}>"))
}

// ── Subscriber ────────────────────────────────────────────────────────────────

/// Installs the global subscriber: [`LineFormat`], `filter` as an `EnvFilter`
/// directive, warn/error to stderr and everything else to stdout.
pub fn init(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter)?)
        .event_format(LineFormat)
        .with_writer(io::stderr.with_max_level(Level::WARN).or_else(io::stdout))
        .try_init()
}

/// Event formatter producing `{symbol} {prefix} {timestamp} {message}` lines.
///
/// Events that carry no `prefix` field (hyper, the server loop) use their
/// target as the prefix. Extra fields are appended as `key=value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = LineFields::default();
        event.record(&mut fields);

        let meta = event.metadata();
        let prefix = fields.prefix.as_deref().unwrap_or_else(|| meta.target());
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        writer.write_str(&render_line(
            *meta.level(),
            prefix,
            &timestamp,
            &fields.message,
            writer.has_ansi_escapes(),
        ))?;
        for (key, value) in &fields.extra {
            write!(writer, " {key}={value}")?;
        }
        writeln!(writer)
    }
}

#[derive(Default)]
struct LineFields {
    prefix: Option<String>,
    message: String,
    extra: Vec<(&'static str, String)>,
}

impl Visit for LineFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "prefix" => self.prefix = Some(value.to_owned()),
            "message" => self.message = value.to_owned(),
            name => self.extra.push((name, value.to_owned())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "prefix" => self.prefix = Some(format!("{value:?}")),
            "message" => self.message = format!("{value:?}"),
            name => self.extra.push((name, format!("{value:?}"))),
        }
    }
}

/// Severity symbol shown at the start of each line.
pub fn symbol(level: Level) -> &'static str {
    match level {
        Level::TRACE => "·",
        Level::DEBUG => "🐛",
        Level::INFO => "ℹ",
        Level::WARN => "⚠",
        Level::ERROR => "❌",
    }
}

fn color(level: Level) -> &'static str {
    match level {
        Level::TRACE => "\x1b[2m",
        Level::DEBUG => "\x1b[35m",
        Level::INFO => "\x1b[36m",
        Level::WARN => "\x1b[33m",
        Level::ERROR => "\x1b[31m",
    }
}

/// Renders one log line without the trailing newline.
pub fn render_line(level: Level, prefix: &str, timestamp: &str, message: &str, ansi: bool) -> String {
    let sym = symbol(level);
    let mut line = if ansi {
        format!("{}{sym} {prefix}{RESET} {TIME_COLOR}{timestamp}{RESET}", color(level))
    } else {
        format!("{sym} {prefix} {timestamp}")
    };
    if !message.is_empty() {
        line.push(' ');
        line.push_str(message);
    }
    line
}
