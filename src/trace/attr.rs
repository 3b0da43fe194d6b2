//! Span attributes.

use opentelemetry::{Key, KeyValue, Value};
use opentelemetry_sdk::trace::SpanData;

/// Initial attributes for a new span.
///
/// Absent values are skipped, so callers can pass optional data without
/// branching:
///
/// ```rust
/// use tollgate::trace::Attributes;
///
/// let trace_id: Option<String> = None;
/// let attrs = Attributes::new()
///     .with("component", "auth")
///     .with_opt("trace.id", trace_id);
/// assert_eq!(attrs.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes(Vec<KeyValue>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.0.push(KeyValue::new(key, value));
        self
    }

    pub fn with_opt<V: Into<Value>>(self, key: impl Into<Key>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Attributes> for Vec<KeyValue> {
    fn from(attrs: Attributes) -> Self {
        attrs.0
    }
}

/// Attribute lookup on a finished span, as handed to an exporter.
pub trait SpanAttributes {
    fn attribute(&self, key: &str) -> Option<&Value>;
}

impl SpanAttributes for SpanData {
    fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.iter().find(|kv| kv.key.as_str() == key).map(|kv| &kv.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_values_are_skipped() {
        let attrs = Attributes::new()
            .with("http.method", "GET")
            .with_opt("trace.id", None::<String>)
            .with_opt("user.id", Some("u1".to_owned()));

        let pairs: Vec<KeyValue> = attrs.into();
        assert_eq!(
            pairs,
            [KeyValue::new("http.method", "GET"), KeyValue::new("user.id", "u1".to_owned())]
        );
    }
}
