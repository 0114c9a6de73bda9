//! Core obfuscator implementation.

use std::sync::atomic::{AtomicBool, Ordering};

use figment::Figment;
use tracing::{debug, error};

use crate::config::{JsonObfuscationConfig, ObfuscationConfig};
use crate::error::{ConfigurationError, ObfuscationError};
use crate::http::{obfuscate_resource, obfuscate_url};
use crate::json::JsonObfuscator;
use crate::memcached::obfuscate_memcached_command;
use crate::redis::{quantize_redis_string, RedisObfuscator};
use crate::span::{Span, SpanKind};
use crate::sql::{obfuscate_sql_string, ObfuscatedSql};

/// Tag name constants for span metadata.
pub mod tags {
    pub const SQL_QUERY: &str = "sql.query";
    pub const SQL_TABLES: &str = "sql.tables";
    pub const REDIS_RAW_COMMAND: &str = "redis.raw_command";
    pub const MEMCACHED_COMMAND: &str = "memcached.command";
    pub const MONGODB_QUERY: &str = "mongodb.query";
    pub const ELASTIC_BODY: &str = "elasticsearch.body";
    pub const HTTP_URL: &str = "http.url";
    pub const HTTP_ROUTE: &str = "http.route";
}

/// Obfuscates spans, dispatching on their type.
///
/// Built once from an [`ObfuscationConfig`] and reused for every span. Sub-obfuscators exist only for the formats that
/// are enabled, and a span whose format has no sub-obfuscator is left untouched.
///
/// Obfuscating a span only needs a shared reference, so an `Obfuscator` can be shared between threads. The literal
/// escape mode may be changed at any time and is read fresh for every SQL query.
#[derive(Debug)]
pub struct Obfuscator {
    config: ObfuscationConfig,
    es: Option<JsonObfuscator>,
    mongo: Option<JsonObfuscator>,
    sql_exec_plan: Option<JsonObfuscator>,
    sql_exec_plan_normalize: Option<JsonObfuscator>,
    redis: Option<RedisObfuscator>,
    memcached_enabled: bool,
    literal_escapes: AtomicBool,
}

impl Obfuscator {
    /// Creates a new `Obfuscator` with the given configuration.
    ///
    /// # Errors
    ///
    /// If any enabled format has an invalid configuration, an error is returned.
    pub fn new(config: ObfuscationConfig) -> Result<Self, ConfigurationError> {
        let json_obfuscator = |format: &'static str, json_config: &JsonObfuscationConfig| {
            if json_config.enabled() {
                debug!(format, "Enabling JSON obfuscation.");
                JsonObfuscator::new(format, json_config, config.sql()).map(Some)
            } else {
                Ok(None)
            }
        };

        let es = json_obfuscator("elasticsearch", config.es())?;
        let mongo = json_obfuscator("mongodb", config.mongo())?;
        let sql_exec_plan = json_obfuscator("sql_exec_plan", config.sql_exec_plan())?;
        let sql_exec_plan_normalize = json_obfuscator("sql_exec_plan_normalize", config.sql_exec_plan_normalize())?;

        let redis = if config.redis().enabled() {
            debug!(remove_all_args = config.redis().remove_all_args(), "Enabling Redis obfuscation.");
            Some(RedisObfuscator::new(config.redis())?)
        } else {
            None
        };

        let memcached_enabled = config.memcached().enabled();
        if memcached_enabled {
            debug!(
                keep_command = config.memcached().keep_command(),
                "Enabling Memcached obfuscation."
            );
        }

        Ok(Self {
            config,
            es,
            mongo,
            sql_exec_plan,
            sql_exec_plan_normalize,
            redis,
            memcached_enabled,
            literal_escapes: AtomicBool::new(true),
        })
    }

    /// Returns the configuration this obfuscator was built from.
    pub fn config(&self) -> &ObfuscationConfig {
        &self.config
    }

    /// Sets whether a backslash inside a quoted SQL string escapes the character that follows it.
    ///
    /// Takes effect for every SQL query obfuscated afterwards, including those processed on other threads.
    pub fn set_literal_escape_mode(&self, enabled: bool) {
        self.literal_escapes.store(enabled, Ordering::Relaxed);
    }

    /// Returns whether a backslash inside a quoted SQL string escapes the character that follows it.
    pub fn literal_escape_mode(&self) -> bool {
        self.literal_escapes.load(Ordering::Relaxed)
    }

    /// Obfuscates the span in place, based on its type.
    ///
    /// Never fails: whenever a value cannot be obfuscated safely, it is left as it was.
    pub fn obfuscate(&self, span: &mut Span) {
        match span.kind() {
            SpanKind::Sql | SpanKind::Cassandra => self.obfuscate_sql_span(span),
            SpanKind::Redis => self.obfuscate_redis_span(span),
            SpanKind::Memcached => self.obfuscate_memcached_span(span),
            SpanKind::Web | SpanKind::Http => self.obfuscate_http_span(span),
            SpanKind::MongoDb => self.obfuscate_json_tag(self.mongo.as_ref(), span, tags::MONGODB_QUERY),
            SpanKind::Elasticsearch => self.obfuscate_json_tag(self.es.as_ref(), span, tags::ELASTIC_BODY),
            SpanKind::Other => {}
        }
    }

    /// Obfuscates a SQL query using the current literal escape mode.
    ///
    /// # Errors
    ///
    /// If the query cannot be tokenized, an error is returned.
    pub fn obfuscate_sql_string(&self, query: &str) -> Result<ObfuscatedSql, ObfuscationError> {
        obfuscate_sql_string(query, self.config.sql(), self.literal_escape_mode())
    }

    /// Obfuscates a JSON SQL execution plan.
    ///
    /// When `normalize` is set, the plan is normalized instead, which also drops cost estimates. Returns `None` when
    /// the corresponding plan obfuscation is not enabled.
    ///
    /// # Errors
    ///
    /// If the plan is not well-formed JSON, an error is returned.
    pub fn obfuscate_sql_exec_plan(&self, plan: &str, normalize: bool) -> Result<Option<String>, ObfuscationError> {
        let obfuscator = if normalize {
            self.sql_exec_plan_normalize.as_ref()
        } else {
            self.sql_exec_plan.as_ref()
        };

        obfuscator
            .map(|obfuscator| obfuscator.obfuscate(plan, self.literal_escape_mode()))
            .transpose()
    }

    fn obfuscate_sql_span(&self, span: &mut Span) {
        if span.resource().is_empty() {
            return;
        }

        match self.obfuscate_sql_string(span.resource()) {
            Ok(obfuscated) => {
                span.set_resource(obfuscated.query.clone());
                span.meta_mut().insert(tags::SQL_QUERY.to_string(), obfuscated.query);
                if !obfuscated.table_names.is_empty() {
                    span.meta_mut()
                        .insert(tags::SQL_TABLES.to_string(), obfuscated.table_names);
                }
            }
            Err(e) => {
                debug!(
                    error = %e,
                    span_type = span.span_type(),
                    "Failed to obfuscate SQL query. Leaving resource unchanged."
                );
            }
        }
    }

    fn obfuscate_redis_span(&self, span: &mut Span) {
        if !span.resource().is_empty() {
            let quantized = quantize_redis_string(span.resource());
            span.set_resource(quantized);
        }

        let Some(redis) = &self.redis else {
            return;
        };

        if let Some(raw_command) = span.meta_mut().get_mut(tags::REDIS_RAW_COMMAND) {
            *raw_command = redis.obfuscate(raw_command);
        }
    }

    fn obfuscate_memcached_span(&self, span: &mut Span) {
        if !self.memcached_enabled {
            return;
        }

        let Some(command) = span.meta().get(tags::MEMCACHED_COMMAND) else {
            return;
        };

        match obfuscate_memcached_command(command, self.config.memcached()) {
            Some(obfuscated) => {
                span.meta_mut().insert(tags::MEMCACHED_COMMAND.to_string(), obfuscated);
            }
            None => {
                span.meta_mut().remove(tags::MEMCACHED_COMMAND);
            }
        }
    }

    fn obfuscate_http_span(&self, span: &mut Span) {
        if let Some(url) = span.meta_mut().get_mut(tags::HTTP_URL) {
            if let Some(obfuscated) = obfuscate_url(url) {
                *url = obfuscated;
            }
        }

        let route = span.meta().get(tags::HTTP_ROUTE).map(String::as_str);
        if let Some(obfuscated) = obfuscate_resource(span.resource(), route) {
            span.set_resource(obfuscated);
        }
    }

    fn obfuscate_json_tag(&self, obfuscator: Option<&JsonObfuscator>, span: &mut Span, tag: &str) {
        let Some(obfuscator) = obfuscator else {
            return;
        };

        let Some(value) = span.meta_mut().get_mut(tag) else {
            return;
        };

        match obfuscator.obfuscate(value, self.literal_escape_mode()) {
            Ok(obfuscated) => *value = obfuscated,
            Err(e) => {
                debug!(
                    format = obfuscator.format(),
                    error = %e,
                    tag,
                    "Failed to obfuscate JSON tag. Leaving value unchanged."
                );
            }
        }
    }
}

/// Loads the obfuscation configuration from the given configuration source and builds an [`Obfuscator`] from it.
///
/// If the configuration section cannot be deserialized, the error is logged and the default configuration is used
/// instead. Execution plan obfuscation and normalization fall back to their default settings when not explicitly
/// enabled.
///
/// # Errors
///
/// If the resulting configuration is invalid, an error is returned.
pub fn load_obfuscator(figment: &Figment) -> Result<Obfuscator, ConfigurationError> {
    let config = ObfuscationConfig::from_figment(figment).unwrap_or_else(|e| {
        error!(error = %e, "Failed to load obfuscation configuration. Using defaults.");
        ObfuscationConfig::default()
    });

    Obfuscator::new(config.with_sql_plan_defaults())
}
