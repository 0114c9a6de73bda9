//! Error types.

use snafu::Snafu;

/// A recoverable, per-call obfuscation failure.
///
/// These never escape [`Obfuscator::obfuscate`][crate::Obfuscator::obfuscate]: the span field being processed is left
/// as it was before obfuscation was attempted.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ObfuscationError {
    /// The input could not be tokenized or parsed well enough to be redacted safely.
    #[snafu(display("malformed {format} input: {reason}"))]
    MalformedInput {
        /// Format handler that rejected the input.
        format: &'static str,

        /// Description of what was wrong with the input.
        reason: String,
    },
}

/// An invalid obfuscation configuration.
///
/// Surfaced when building an [`Obfuscator`][crate::Obfuscator], never while processing spans.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ConfigurationError {
    /// A JSON section referenced a transformer that does not exist.
    #[snafu(display("unknown transformer type '{transformer_type}' configured for '{format}'"))]
    UnknownTransformer {
        /// Configuration section.
        format: &'static str,

        /// Transformer type as configured.
        transformer_type: String,
    },

    /// A JSON section listed values to transform without naming a transformer.
    #[snafu(display("'{format}' lists values to transform but no transformer type is configured"))]
    MissingTransformer {
        /// Configuration section.
        format: &'static str,
    },

    /// A field name appeared in both the keep and transform lists of a JSON section.
    #[snafu(display("field '{field}' is listed as both kept and transformed in '{format}'"))]
    OverlappingFields {
        /// Configuration section.
        format: &'static str,

        /// Offending field name.
        field: String,
    },

    /// A Redis command rule was not usable.
    #[snafu(display("invalid Redis rule for command '{command}': {reason}"))]
    InvalidRedisRule {
        /// Command the rule was attached to.
        command: String,

        /// Why the rule was rejected.
        reason: String,
    },

    /// The obfuscation section could not be extracted from the configuration source.
    #[snafu(display("failed to load obfuscation configuration: {source}"))]
    Load {
        /// Error source.
        source: Box<figment::Error>,
    },
}
