//! Obfuscation of sensitive values in trace spans.
//!
//! An [`Obfuscator`] is built once from an [`ObfuscationConfig`] and then applied to spans, rewriting their resource
//! and tags in place based on the span type:
//!
//! - `sql`, `cassandra`: literals in the query are replaced by `?`
//! - `redis`: the resource is quantized to command names, and `redis.raw_command` is obfuscated when enabled
//! - `memcached`: stored values are dropped from `memcached.command` when enabled
//! - `web`, `http`: URLs lose their userinfo and query string, and identifier-like path segments are templated
//! - `mongodb`, `elasticsearch`: the JSON query or body is reduced to an allow-list of fields when enabled
//!
//! Spans of any other type are left untouched.

pub mod collections;
pub mod config;
mod error;
pub mod http;
pub mod json;
pub mod memcached;
pub mod normalize;
mod obfuscator;
pub mod redis;
mod span;
pub mod sql;
mod sql_tokenizer;

pub use self::config::ObfuscationConfig;
pub use self::error::{ConfigurationError, ObfuscationError};
pub use self::obfuscator::{load_obfuscator, tags, Obfuscator};
pub use self::span::{Span, SpanKind};
