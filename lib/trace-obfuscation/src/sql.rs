//! SQL query obfuscation.

use std::borrow::Cow;

use crate::config::SqlObfuscationConfig;
use crate::error::ObfuscationError;
use crate::normalize::compact_whitespaces;
use crate::sql_tokenizer::{SqlTokenizer, Token, TokenKind};

const PLACEHOLDER: &str = "?";

/// Result of SQL obfuscation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObfuscatedSql {
    /// The obfuscated query.
    pub query: String,

    /// Comma-separated list of table names, in order of first appearance.
    ///
    /// Always empty unless table name collection is enabled.
    pub table_names: String,
}

/// Obfuscates a SQL query by replacing every literal with `?`.
///
/// Comments are dropped, lists of literals such as `IN (1, 2, 3)` collapse into a single placeholder, and whitespace
/// is normalized. Keywords, identifiers and operators are kept as they are.
///
/// `backslash_escapes` controls whether a backslash inside a quoted string escapes the following character.
///
/// # Errors
///
/// If the query contains a character that cannot start any SQL token, an error is returned and nothing is emitted.
pub fn obfuscate_sql_string(
    query: &str, config: &SqlObfuscationConfig, backslash_escapes: bool,
) -> Result<ObfuscatedSql, ObfuscationError> {
    let mut tokenizer = SqlTokenizer::new(query, backslash_escapes);
    let mut tables = TableCollector::new(config);
    let mut output = TokenBuffer::default();
    let mut last: Option<Token<'_>> = None;

    while let Some(token) = tokenizer.scan()? {
        if token.kind == TokenKind::Comment {
            continue;
        }

        let previous = last.replace(token);
        tables.observe(previous.as_ref(), &token);

        if is_redacted(previous.as_ref(), &token) {
            output.push_placeholder();
            continue;
        }

        let text = match token.kind {
            TokenKind::Ident | TokenKind::QuotedIdent if config.replace_digits() => replace_digits(token.text),
            _ => Cow::Borrowed(token.text),
        };

        if text == ")" {
            output.push_close_paren();
        } else {
            output.push(text);
        }
    }

    Ok(ObfuscatedSql {
        query: output.finish(),
        table_names: tables.finish(),
    })
}

fn is_redacted(previous: Option<&Token<'_>>, token: &Token<'_>) -> bool {
    if token.kind.is_literal() {
        return true;
    }

    match previous {
        // Savepoint names are user-provided and frequently generated.
        Some(prev) if prev.kind == TokenKind::Keyword && prev.text.eq_ignore_ascii_case("SAVEPOINT") => true,
        // Double-quoted strings are string literals in MySQL, but only recognizable as such in comparisons.
        Some(prev) if prev.text == "=" => token.kind == TokenKind::QuotedIdent && token.text.starts_with('"'),
        _ => false,
    }
}

/// Output tokens, with placeholder grouping applied as they are pushed.
#[derive(Default)]
struct TokenBuffer<'a> {
    tokens: Vec<Cow<'a, str>>,
}

impl<'a> TokenBuffer<'a> {
    fn push(&mut self, text: Cow<'a, str>) {
        self.tokens.push(text);
    }

    fn push_placeholder(&mut self) {
        // `?, ?` becomes `?`.
        if self.ends_with(&[PLACEHOLDER, ","]) {
            self.tokens.pop();
            return;
        }
        self.tokens.push(Cow::Borrowed(PLACEHOLDER));
    }

    fn push_close_paren(&mut self) {
        // `( ? ), ( ? )` becomes `( ? )`.
        if self.ends_with(&["(", PLACEHOLDER, ")", ",", "(", PLACEHOLDER]) {
            self.tokens.truncate(self.tokens.len() - 3);
            return;
        }
        self.tokens.push(Cow::Borrowed(")"));
    }

    fn ends_with(&self, suffix: &[&str]) -> bool {
        self.tokens.len() >= suffix.len()
            && self.tokens[self.tokens.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(token, expected)| token == expected)
    }

    fn finish(mut self) -> String {
        while self.tokens.last().is_some_and(|token| token == ";") {
            self.tokens.pop();
        }

        let mut joined = String::new();
        let mut previous: Option<&str> = None;
        for token in self.tokens.iter().map(|token| &**token) {
            if let Some(previous) = previous {
                if needs_space(previous, token) {
                    joined.push(' ');
                }
            }
            joined.push_str(token);
            previous = Some(token);
        }

        compact_whitespaces(&joined)
    }
}

fn needs_space(previous: &str, token: &str) -> bool {
    // `.` only joins names, so `x . ?` stays apart and reads back the same way.
    match (previous, token) {
        (_, ",") => false,
        (previous, ".") => !is_name(previous),
        (".", token) => !is_name(token),
        _ => true,
    }
}

fn is_name(token: &str) -> bool {
    token
        .bytes()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, b'_' | b'`' | b'"' | b'[') || c >= 0x80)
}

/// Collects the names of tables referenced by a query.
struct TableCollector {
    enabled: bool,
    replace_digits: bool,
    names: Vec<String>,
}

impl TableCollector {
    fn new(config: &SqlObfuscationConfig) -> Self {
        Self {
            enabled: config.table_names(),
            replace_digits: config.replace_digits(),
            names: Vec::new(),
        }
    }

    fn observe(&mut self, previous: Option<&Token<'_>>, token: &Token<'_>) {
        if !self.enabled || !matches!(token.kind, TokenKind::Ident | TokenKind::QuotedIdent) {
            return;
        }

        let follows_table_keyword = previous.is_some_and(|prev| {
            prev.kind == TokenKind::Keyword
                && ["FROM", "JOIN", "INTO", "UPDATE", "TABLE"]
                    .iter()
                    .any(|kw| prev.text.eq_ignore_ascii_case(kw))
        });
        if !follows_table_keyword {
            return;
        }

        let unquoted = token.text.trim_matches(|c| c == '"' || c == '`');
        let name = if self.replace_digits {
            replace_digits(unquoted).into_owned()
        } else {
            unquoted.to_string()
        };

        if !name.is_empty() && !self.names.contains(&name) {
            self.names.push(name);
        }
    }

    fn finish(self) -> String {
        self.names.join(",")
    }
}

/// Replaces every run of ASCII digits with a single `?`.
fn replace_digits(s: &str) -> Cow<'_, str> {
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return Cow::Borrowed(s);
    }

    let mut result = String::with_capacity(s.len());
    let mut in_digits = false;
    for c in s.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                result.push('?');
            }
            in_digits = true;
        } else {
            result.push(c);
            in_digits = false;
        }
    }

    Cow::Owned(result)
}
