//! Spans.

use std::fmt;

use crate::collections::FastHashMap;

/// The declared type of a span, as far as obfuscation is concerned.
///
/// Only the types with a dedicated handler are named. Everything else maps to [`SpanKind::Other`] and passes through
/// the obfuscator untouched.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpanKind {
    Sql,
    Cassandra,
    Redis,
    Memcached,
    Web,
    Http,
    MongoDb,
    Elasticsearch,
    Other,
}

impl SpanKind {
    /// Classifies a raw span type string.
    pub fn from_type(span_type: &str) -> Self {
        match span_type {
            "sql" => Self::Sql,
            "cassandra" => Self::Cassandra,
            "redis" => Self::Redis,
            "memcached" => Self::Memcached,
            "web" => Self::Web,
            "http" => Self::Http,
            "mongodb" => Self::MongoDb,
            "elasticsearch" => Self::Elasticsearch,
            _ => Self::Other,
        }
    }
}

/// A span.
///
/// Only the parts of a span the obfuscator reads or rewrites are modeled: identity fields are carried so callers can
/// round-trip them, but are never touched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Span {
    service: String,
    name: String,
    resource: String,
    span_type: String,
    meta: FastHashMap<String, String>,
}

impl Span {
    /// Creates a new `Span` with the given type and resource.
    pub fn new(span_type: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            span_type: span_type.into(),
            resource: resource.into(),
            ..Self::default()
        }
    }

    /// Sets the service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Sets the operation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Returns the service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resource.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Replaces the resource.
    pub fn set_resource(&mut self, resource: impl Into<String>) {
        self.resource = resource.into();
    }

    /// Returns the raw span type.
    pub fn span_type(&self) -> &str {
        &self.span_type
    }

    /// Returns the span type classified for dispatch.
    pub fn kind(&self) -> SpanKind {
        SpanKind::from_type(&self.span_type)
    }

    /// Returns the tags.
    pub fn meta(&self) -> &FastHashMap<String, String> {
        &self.meta
    }

    /// Returns a mutable reference to the tags.
    pub fn meta_mut(&mut self) -> &mut FastHashMap<String, String> {
        &mut self.meta
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sql => "sql",
            Self::Cassandra => "cassandra",
            Self::Redis => "redis",
            Self::Memcached => "memcached",
            Self::Web => "web",
            Self::Http => "http",
            Self::MongoDb => "mongodb",
            Self::Elasticsearch => "elasticsearch",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
