//! Obfuscation configuration types.
//!
//! These types mirror the Datadog Agent's `apm_config.obfuscation` section. Every section defaults to disabled, so
//! the zero-value [`ObfuscationConfig`] only runs the handlers that have no enable flag (SQL, HTTP and Redis
//! quantization).

use figment::Figment;
use serde::Deserialize;
use snafu::ResultExt as _;

use crate::collections::FastHashMap;
use crate::error::{ConfigurationError, Load};
use crate::redis::RedisArgRule;

/// Configuration key under which the obfuscation section lives.
pub const OBFUSCATION_CONFIG_KEY: &str = "apm_config.obfuscation";

/// Name of the transformer that redacts SQL literals.
pub const OBFUSCATE_SQL_TRANSFORMER: &str = "obfuscate_sql";

/// Configuration for the obfuscator.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Elasticsearch body obfuscation settings.
    #[serde(alias = "elasticsearch")]
    es: JsonObfuscationConfig,

    /// MongoDB query obfuscation settings.
    #[serde(alias = "mongodb")]
    mongo: JsonObfuscationConfig,

    /// SQL execution plan obfuscation settings.
    sql_exec_plan: JsonObfuscationConfig,

    /// SQL execution plan normalization settings.
    sql_exec_plan_normalize: JsonObfuscationConfig,

    /// SQL query obfuscation settings.
    sql: SqlObfuscationConfig,

    /// Redis obfuscation settings.
    redis: RedisObfuscationConfig,

    /// Memcached obfuscation settings.
    memcached: MemcachedObfuscationConfig,
}

/// JSON obfuscation configuration, used for MongoDB queries, Elasticsearch bodies and SQL execution plans.
///
/// Fields are matched by name at any depth. Values of fields in `keep_values` are emitted verbatim, string values of
/// fields in `transform_values` are passed through the transformer named by `transformer_type`, and every other field
/// is dropped.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonObfuscationConfig {
    /// Whether JSON obfuscation is enabled for this format.
    pub(crate) enabled: bool,

    /// Transformer applied to the string values of `transform_values` fields.
    #[serde(alias = "transformer")]
    pub(crate) transformer_type: String,

    /// Fields whose values are kept verbatim.
    pub(crate) keep_values: Vec<String>,

    /// Fields whose string values are kept after being transformed.
    #[serde(alias = "obfuscate_sql_values")]
    pub(crate) transform_values: Vec<String>,
}

/// SQL obfuscation configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SqlObfuscationConfig {
    /// Whether to collect the names of the tables a query references.
    pub(crate) table_names: bool,

    /// Whether to replace digits in identifiers and table names.
    pub(crate) replace_digits: bool,
}

/// Redis obfuscation configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RedisObfuscationConfig {
    /// Whether Redis raw command obfuscation is enabled.
    pub(crate) enabled: bool,

    /// Whether to replace all arguments of every command, regardless of the command rules.
    pub(crate) remove_all_args: bool,

    /// Additional or overriding argument rules, keyed by command name.
    pub(crate) commands: FastHashMap<String, RedisArgRule>,
}

/// Memcached obfuscation configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MemcachedObfuscationConfig {
    /// Whether Memcached command obfuscation is enabled.
    pub(crate) enabled: bool,

    /// Whether to keep the command line (if false, the whole tag is removed).
    pub(crate) keep_command: bool,
}

impl ObfuscationConfig {
    /// Extracts the obfuscation section from the given configuration source.
    ///
    /// A missing section yields the default configuration.
    ///
    /// # Errors
    ///
    /// If the section is present but cannot be deserialized, an error is returned.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigurationError> {
        if !figment.contains(OBFUSCATION_CONFIG_KEY) {
            return Ok(Self::default());
        }

        figment
            .extract_inner(OBFUSCATION_CONFIG_KEY)
            .map_err(Box::new)
            .context(Load)
    }

    /// Installs the default SQL execution plan settings for whichever plan sections are not enabled.
    pub fn with_sql_plan_defaults(mut self) -> Self {
        if !self.sql_exec_plan.enabled {
            self.sql_exec_plan = default_sql_plan_obfuscate_settings();
        }
        if !self.sql_exec_plan_normalize.enabled {
            self.sql_exec_plan_normalize = default_sql_plan_normalize_settings();
        }
        self
    }

    pub fn es(&self) -> &JsonObfuscationConfig {
        &self.es
    }

    pub fn set_es(&mut self, es: JsonObfuscationConfig) {
        self.es = es;
    }

    pub fn mongo(&self) -> &JsonObfuscationConfig {
        &self.mongo
    }

    pub fn set_mongo(&mut self, mongo: JsonObfuscationConfig) {
        self.mongo = mongo;
    }

    pub fn sql_exec_plan(&self) -> &JsonObfuscationConfig {
        &self.sql_exec_plan
    }

    pub fn sql_exec_plan_normalize(&self) -> &JsonObfuscationConfig {
        &self.sql_exec_plan_normalize
    }

    pub fn sql(&self) -> &SqlObfuscationConfig {
        &self.sql
    }

    pub fn set_sql(&mut self, sql: SqlObfuscationConfig) {
        self.sql = sql;
    }

    pub fn redis(&self) -> &RedisObfuscationConfig {
        &self.redis
    }

    pub fn set_redis(&mut self, redis: RedisObfuscationConfig) {
        self.redis = redis;
    }

    pub fn memcached(&self) -> &MemcachedObfuscationConfig {
        &self.memcached
    }

    pub fn set_memcached(&mut self, memcached: MemcachedObfuscationConfig) {
        self.memcached = memcached;
    }
}

impl JsonObfuscationConfig {
    /// Creates an enabled configuration.
    pub fn new(
        transformer_type: impl Into<String>, keep_values: impl IntoIterator<Item = impl Into<String>>,
        transform_values: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            enabled: true,
            transformer_type: transformer_type.into(),
            keep_values: keep_values.into_iter().map(Into::into).collect(),
            transform_values: transform_values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn transformer_type(&self) -> &str {
        &self.transformer_type
    }

    pub fn keep_values(&self) -> &[String] {
        &self.keep_values
    }

    pub fn transform_values(&self) -> &[String] {
        &self.transform_values
    }
}

impl SqlObfuscationConfig {
    pub fn table_names(&self) -> bool {
        self.table_names
    }

    pub fn replace_digits(&self) -> bool {
        self.replace_digits
    }
}

impl RedisObfuscationConfig {
    /// Creates an enabled configuration using the built-in command rules.
    pub fn enabled_with_defaults() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Adds or overrides the rule for `command`.
    pub fn with_command_rule(mut self, command: impl Into<String>, rule: RedisArgRule) -> Self {
        self.commands.insert(command.into(), rule);
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn remove_all_args(&self) -> bool {
        self.remove_all_args
    }

    pub fn commands(&self) -> &FastHashMap<String, RedisArgRule> {
        &self.commands
    }
}

impl MemcachedObfuscationConfig {
    /// Creates an enabled configuration.
    pub fn new(keep_command: bool) -> Self {
        Self {
            enabled: true,
            keep_command,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn keep_command(&self) -> bool {
        self.keep_command
    }
}

const SQL_PLAN_TRANSFORM_VALUES: &[&str] = &[
    // mysql
    "attached_condition",
    // postgres
    "Recheck Cond",
    "Merge Cond",
    "Hash Cond",
    "Join Filter",
];

const SQL_PLAN_NORMALIZE_KEEP_VALUES: &[&str] = &[
    // mysql
    "select_id",
    "using_filesort",
    "table_name",
    "access_type",
    "possible_keys",
    "key",
    "key_length",
    "used_key_parts",
    "used_columns",
    "ref",
    "update",
    // postgres
    "Node Type",
    "Parallel Aware",
    "Scan Direction",
    "Index Name",
    "Relation Name",
    "Alias",
    "Parent Relationship",
    "Sort Key",
];

const SQL_PLAN_COST_KEEP_VALUES: &[&str] = &[
    // mysql
    "cost_info",
    // postgres
    "Startup Cost",
    "Total Cost",
    "Plan Rows",
    "Plan Width",
];

/// Default settings for normalizing SQL execution plans.
pub fn default_sql_plan_normalize_settings() -> JsonObfuscationConfig {
    JsonObfuscationConfig::new(
        OBFUSCATE_SQL_TRANSFORMER,
        SQL_PLAN_NORMALIZE_KEEP_VALUES.iter().copied(),
        SQL_PLAN_TRANSFORM_VALUES.iter().copied(),
    )
}

/// Default settings for obfuscating SQL execution plans.
///
/// Builds on [`default_sql_plan_normalize_settings`] by also keeping cost and row estimates.
pub fn default_sql_plan_obfuscate_settings() -> JsonObfuscationConfig {
    JsonObfuscationConfig::new(
        OBFUSCATE_SQL_TRANSFORMER,
        SQL_PLAN_COST_KEEP_VALUES
            .iter()
            .chain(SQL_PLAN_NORMALIZE_KEEP_VALUES)
            .copied(),
        SQL_PLAN_TRANSFORM_VALUES.iter().copied(),
    )
}
