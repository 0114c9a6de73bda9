//! JSON obfuscation for MongoDB queries, Elasticsearch bodies, and SQL execution plans.

use serde_json::{Map, Value};

use crate::collections::FastHashSet;
use crate::config::{JsonObfuscationConfig, SqlObfuscationConfig, OBFUSCATE_SQL_TRANSFORMER};
use crate::error::{
    ConfigurationError, MalformedInput, MissingTransformer, ObfuscationError, OverlappingFields, UnknownTransformer,
};
use crate::sql::obfuscate_sql_string;

const PLACEHOLDER: &str = "?";

/// Literal-redaction applied to the values of transformed fields.
#[derive(Clone, Debug)]
enum Transformer {
    /// Obfuscates the value as a SQL fragment.
    ObfuscateSql(SqlObfuscationConfig),
}

impl Transformer {
    fn from_config(
        format: &'static str, config: &JsonObfuscationConfig, sql_config: &SqlObfuscationConfig,
    ) -> Result<Option<Self>, ConfigurationError> {
        match config.transformer_type() {
            "" if config.transform_values().is_empty() => Ok(None),
            "" => MissingTransformer { format }.fail(),
            OBFUSCATE_SQL_TRANSFORMER => Ok(Some(Self::ObfuscateSql(sql_config.clone()))),
            other => UnknownTransformer {
                format,
                transformer_type: other,
            }
            .fail(),
        }
    }

    fn apply(&self, value: Value, literal_escapes: bool) -> Value {
        match (self, value) {
            (Self::ObfuscateSql(sql_config), Value::String(s)) => {
                match obfuscate_sql_string(&s, sql_config, literal_escapes) {
                    Ok(obfuscated) => Value::String(obfuscated.query),
                    Err(_) => Value::String(PLACEHOLDER.to_string()),
                }
            }
            (_, value) => value,
        }
    }
}

/// Rewrites JSON documents, keeping only an allow-list of fields.
///
/// Fields are matched by name at any depth. A kept field is emitted verbatim with its whole subtree. A transformed
/// field is emitted with its string value passed through the configured transformer. Every other field is dropped,
/// unless its subtree contains kept or transformed fields, in which case only those are retained.
#[derive(Debug)]
pub struct JsonObfuscator {
    format: &'static str,
    keep_keys: FastHashSet<String>,
    transform_keys: FastHashSet<String>,
    transformer: Option<Transformer>,
}

impl JsonObfuscator {
    /// Creates a new `JsonObfuscator` for the given format.
    ///
    /// # Errors
    ///
    /// If the configuration names an unknown transformer, lists values to transform without naming a transformer, or
    /// lists the same field as both kept and transformed, an error is returned.
    pub fn new(
        format: &'static str, config: &JsonObfuscationConfig, sql_config: &SqlObfuscationConfig,
    ) -> Result<Self, ConfigurationError> {
        let transformer = Transformer::from_config(format, config, sql_config)?;

        let keep_keys: FastHashSet<String> = config.keep_values().iter().cloned().collect();
        let transform_keys: FastHashSet<String> = config.transform_values().iter().cloned().collect();
        if let Some(field) = config.transform_values().iter().find(|field| keep_keys.contains(*field)) {
            return OverlappingFields { format, field }.fail();
        }

        Ok(Self {
            format,
            keep_keys,
            transform_keys,
            transformer,
        })
    }

    /// Returns the name of the format this obfuscator was built for.
    pub fn format(&self) -> &'static str {
        self.format
    }

    /// Obfuscates a JSON document.
    ///
    /// If nothing in the document is retained, an empty object or array is returned, matching the type of the root
    /// value. A scalar root is never retained.
    ///
    /// # Errors
    ///
    /// If `input` is not a single well-formed JSON document, an error is returned.
    pub fn obfuscate(&self, input: &str, literal_escapes: bool) -> Result<String, ObfuscationError> {
        let root: Value = serde_json::from_str(input).map_err(|e| self.malformed(e))?;

        let pruned = match root {
            Value::Object(_) => self.prune(root, literal_escapes).unwrap_or_else(|| Value::Object(Map::new())),
            Value::Array(_) => self.prune(root, literal_escapes).unwrap_or_else(|| Value::Array(Vec::new())),
            _ => return Ok(String::new()),
        };

        serde_json::to_string(&pruned).map_err(|e| self.malformed(e))
    }

    fn prune(&self, value: Value, literal_escapes: bool) -> Option<Value> {
        match value {
            Value::Object(map) => {
                let mut retained = Map::new();
                for (key, value) in map {
                    if self.keep_keys.contains(&key) {
                        retained.insert(key, value);
                    } else if self.transform_keys.contains(&key) {
                        let value = match &self.transformer {
                            Some(transformer) => transformer.apply(value, literal_escapes),
                            None => value,
                        };
                        retained.insert(key, value);
                    } else if let Some(value) = self.prune(value, literal_escapes) {
                        retained.insert(key, value);
                    }
                }
                (!retained.is_empty()).then_some(Value::Object(retained))
            }
            Value::Array(values) => {
                let retained = values
                    .into_iter()
                    .filter_map(|value| self.prune(value, literal_escapes))
                    .collect::<Vec<_>>();
                (!retained.is_empty()).then_some(Value::Array(retained))
            }
            _ => None,
        }
    }

    fn malformed(&self, e: serde_json::Error) -> ObfuscationError {
        MalformedInput {
            format: self.format,
            reason: e.to_string(),
        }
        .build()
    }
}
