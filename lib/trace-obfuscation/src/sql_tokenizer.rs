//! SQL tokenizer.

use crate::error::{MalformedInput, ObfuscationError};
use crate::normalize::{scan_quoted, QuoteRules};

/// Token classes recognized by the SQL tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A reserved word, such as `SELECT` or `FROM`.
    Keyword,
    Ident,
    /// An identifier delimited by double quotes or backticks.
    QuotedIdent,
    Operator,
    /// Parentheses, brackets, braces, commas and semicolons.
    Punct,
    Number,
    String,
    DollarQuotedString,
    Null,
    Boolean,
    /// Positional or driver-formatted parameters: `$1`, `%s`, `%(name)s`.
    Variable,
    /// Named bind variables (`:name`, `@name`), which are kept as-is.
    BindVar,
    /// A `?` placeholder.
    Placeholder,
    Comment,
}

impl TokenKind {
    /// Returns `true` if tokens of this kind carry a literal value that must never be emitted.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            Self::Number
                | Self::String
                | Self::DollarQuotedString
                | Self::Null
                | Self::Boolean
                | Self::Variable
                | Self::Placeholder
        )
    }

    // Whether a following `-` is a binary operator rather than the sign of a number.
    fn ends_operand(self) -> bool {
        matches!(
            self,
            Self::Ident
                | Self::QuotedIdent
                | Self::Number
                | Self::String
                | Self::DollarQuotedString
                | Self::Null
                | Self::Boolean
                | Self::Variable
                | Self::BindVar
                | Self::Placeholder
        )
    }
}

/// A single token, borrowing its text from the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

const KEYWORDS: &[&str] = &[
    "ALTER", "AND", "AS", "ASC", "BEGIN", "BETWEEN", "BY", "CASE", "COMMIT", "CREATE", "DELETE", "DESC", "DISTINCT",
    "DROP", "ELSE", "END", "EXISTS", "FROM", "GRANT", "GROUP", "HAVING", "IN", "INNER", "INSERT", "INTO", "IS", "JOIN",
    "LEFT", "LIKE", "LIMIT", "NOT", "OFFSET", "ON", "OR", "ORDER", "OUTER", "REVOKE", "RIGHT", "ROLLBACK", "SAVEPOINT",
    "SELECT", "SET", "TABLE", "THEN", "TRUNCATE", "UNION", "UPDATE", "USING", "VALUES", "WHEN", "WHERE", "WITH",
];

/// SQL tokenizer that breaks a query into [`Token`]s.
///
/// Whitespace separates tokens and is never emitted. Unterminated strings, quoted identifiers and comments run to the
/// end of the input instead of failing.
pub struct SqlTokenizer<'a> {
    query: &'a str,
    buf: &'a [u8],
    pos: usize,
    string_rules: QuoteRules,
    last_kind: Option<TokenKind>,
}

impl<'a> SqlTokenizer<'a> {
    /// Creates a new tokenizer.
    ///
    /// When `backslash_escapes` is set, a backslash inside a single-quoted string escapes the next character, so `\'`
    /// does not end the string.
    pub fn new(query: &'a str, backslash_escapes: bool) -> Self {
        Self {
            query,
            buf: query.as_bytes(),
            pos: 0,
            string_rules: QuoteRules {
                backslash_escapes,
                doubled_quotes: true,
            },
            last_kind: None,
        }
    }

    /// Scans the next token, or returns `None` at the end of the input.
    ///
    /// # Errors
    ///
    /// If a character is found that cannot start any token, an error is returned.
    pub fn scan(&mut self) -> Result<Option<Token<'a>>, ObfuscationError> {
        self.skip_blank();

        let start = self.pos;
        let Some(&ch) = self.buf.get(start) else {
            return Ok(None);
        };

        let kind = match ch {
            b'\'' => self.scan_string(start, self.string_rules),
            b'"' | b'`' => self.scan_quoted_ident(start),
            b'0'..=b'9' => self.scan_number(),
            b'.' if self.peek_is_digit(1) => self.scan_number(),
            b'-' => match self.peek(1) {
                Some(b'-') => self.scan_comment_to_eol(),
                Some(b'>') => self.take_operator(&["->>", "->"]),
                Some(b'0'..=b'9') | Some(b'.')
                    if self.starts_number(1) && !self.last_kind.is_some_and(TokenKind::ends_operand) =>
                {
                    self.pos += 1;
                    self.scan_number()
                }
                _ => self.take(1, TokenKind::Operator),
            },
            b'/' => match self.peek(1) {
                Some(b'*') => self.scan_comment_multiline(),
                _ => self.take(1, TokenKind::Operator),
            },
            b'#' => match self.peek(1) {
                Some(b'>') | Some(b'-') => self.take_operator(&["#>>", "#>", "#-"]),
                _ => self.scan_comment_to_eol(),
            },
            b'$' => self.scan_dollar(start),
            b'?' => match self.peek(1) {
                Some(b'|') | Some(b'&') => self.take(2, TokenKind::Operator),
                _ => self.take(1, TokenKind::Placeholder),
            },
            b':' => match self.peek(1) {
                Some(b':') | Some(b'=') => self.take(2, TokenKind::Operator),
                Some(c) if is_ident_start(c) => self.scan_bind_var(1),
                _ => self.take(1, TokenKind::Punct),
            },
            b'@' => match self.peek(1) {
                Some(b'>') => self.take(2, TokenKind::Operator),
                Some(b'@') => self.scan_bind_var(2),
                _ => self.scan_bind_var(1),
            },
            b'%' => self.scan_percent(),
            b'<' => self.take_operator(&["<=>", "<=", "<>", "<@", "<<", "<"]),
            b'>' => self.take_operator(&[">=", ">>", ">"]),
            b'!' => self.take_operator(&["!=", "!"]),
            b'|' => self.take_operator(&["||", "|"]),
            b'=' | b'+' | b'*' | b'&' | b'^' | b'~' => self.take(1, TokenKind::Operator),
            b'(' | b')' | b'[' | b']' | b'{' | b'}' | b',' | b';' => self.take(1, TokenKind::Punct),
            b'.' => self.take(1, TokenKind::Punct),
            c if is_ident_start(c) => self.scan_identifier(start),
            c => {
                return Err(MalformedInput {
                    format: "sql",
                    reason: format!("unexpected byte 0x{:02x} at position {}", c, start),
                }
                .build())
            }
        };

        // Every branch above consumes at least one byte, so the tokenizer always makes progress.
        let text = &self.query[start..self.pos];
        if kind != TokenKind::Comment {
            self.last_kind = Some(kind);
        }

        Ok(Some(Token { kind, text }))
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.buf.get(self.pos + ahead).copied()
    }

    fn peek_is_digit(&self, ahead: usize) -> bool {
        self.peek(ahead).is_some_and(|c| c.is_ascii_digit())
    }

    // A digit, or a dot followed by a digit.
    fn starts_number(&self, ahead: usize) -> bool {
        self.peek_is_digit(ahead) || (self.peek(ahead) == Some(b'.') && self.peek_is_digit(ahead + 1))
    }

    fn skip_blank(&mut self) {
        while self
            .buf
            .get(self.pos)
            .is_some_and(|c| matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c))
        {
            self.pos += 1;
        }
    }

    fn take(&mut self, len: usize, kind: TokenKind) -> TokenKind {
        self.pos = (self.pos + len).min(self.buf.len());
        kind
    }

    // Candidates must be ordered longest first.
    fn take_operator(&mut self, candidates: &[&str]) -> TokenKind {
        let rest = &self.buf[self.pos..];
        let len = candidates
            .iter()
            .find(|op| rest.starts_with(op.as_bytes()))
            .map_or(1, |op| op.len());
        self.take(len, TokenKind::Operator)
    }

    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        while self.buf.get(self.pos).copied().is_some_and(is_ident_continue) {
            self.pos += 1;
        }

        // A trailing `.` is punctuation, not part of the name.
        while self.pos - start > 1 && self.buf[self.pos - 1] == b'.' {
            self.pos -= 1;
        }

        // String literal prefixes: N'national', E'escaped', B'0101', X'ff'.
        if self.pos - start == 1 && self.peek(0) == Some(b'\'') {
            let rules = match self.buf[start] {
                b'E' | b'e' => QuoteRules {
                    backslash_escapes: true,
                    doubled_quotes: true,
                },
                b'N' | b'n' | b'B' | b'b' | b'X' | b'x' => self.string_rules,
                _ => return TokenKind::Ident,
            };
            return self.scan_string(self.pos, rules);
        }

        let word = &self.query[start..self.pos];
        if word.eq_ignore_ascii_case("NULL") {
            TokenKind::Null
        } else if word.eq_ignore_ascii_case("TRUE") || word.eq_ignore_ascii_case("FALSE") {
            TokenKind::Boolean
        } else if KEYWORDS.iter().any(|kw| word.eq_ignore_ascii_case(kw)) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        }
    }

    fn scan_number(&mut self) -> TokenKind {
        if self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            while self.buf.get(self.pos).is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            return TokenKind::Number;
        }

        let mut seen_dot = false;
        while let Some(c) = self.peek(0) {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !seen_dot => {
                    seen_dot = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }

        if matches!(self.peek(0), Some(b'e') | Some(b'E')) {
            let sign = usize::from(matches!(self.peek(1), Some(b'+') | Some(b'-')));
            if self.peek_is_digit(1 + sign) {
                self.pos += 1 + sign;
                while self.peek_is_digit(0) {
                    self.pos += 1;
                }
            }
        }

        TokenKind::Number
    }

    fn scan_string(&mut self, quote_at: usize, rules: QuoteRules) -> TokenKind {
        self.pos = scan_quoted(self.buf, quote_at, rules);
        TokenKind::String
    }

    fn scan_quoted_ident(&mut self, start: usize) -> TokenKind {
        let rules = QuoteRules {
            backslash_escapes: false,
            doubled_quotes: true,
        };
        self.pos = scan_quoted(self.buf, start, rules);
        TokenKind::QuotedIdent
    }

    fn scan_comment_to_eol(&mut self) -> TokenKind {
        match self.buf[self.pos..].iter().position(|&c| c == b'\n') {
            Some(offset) => self.pos += offset,
            None => self.pos = self.buf.len(),
        }
        TokenKind::Comment
    }

    fn scan_comment_multiline(&mut self) -> TokenKind {
        let body = self.pos + 2;
        match find(&self.buf[body..], b"*/") {
            Some(offset) => self.pos = body + offset + 2,
            None => self.pos = self.buf.len(),
        }
        TokenKind::Comment
    }

    fn scan_dollar(&mut self, start: usize) -> TokenKind {
        self.pos += 1;

        if self.peek_is_digit(0) {
            while self.peek_is_digit(0) {
                self.pos += 1;
            }
            return TokenKind::Variable;
        }

        while self
            .buf
            .get(self.pos)
            .is_some_and(|&c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }

        if self.peek(0) != Some(b'$') {
            return TokenKind::Variable;
        }

        // `$tag$ ... $tag$`, where the tag may be empty.
        self.pos += 1;
        let delimiter = &self.buf[start..self.pos];
        match find(&self.buf[self.pos..], delimiter) {
            Some(offset) => self.pos += offset + delimiter.len(),
            None => self.pos = self.buf.len(),
        }
        TokenKind::DollarQuotedString
    }

    fn scan_bind_var(&mut self, prefix_len: usize) -> TokenKind {
        self.pos += prefix_len;
        while self.buf.get(self.pos).copied().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        TokenKind::BindVar
    }

    fn scan_percent(&mut self) -> TokenKind {
        match self.peek(1) {
            Some(b'(') => match self.buf[self.pos..].iter().position(|&c| c == b')') {
                // `%(name)s`
                Some(close) if self.buf.get(self.pos + close + 1).is_some_and(u8::is_ascii_alphabetic) => {
                    self.take(close + 2, TokenKind::Variable)
                }
                _ => self.take(1, TokenKind::Operator),
            },
            Some(c) if c.is_ascii_alphabetic() => self.take(2, TokenKind::Variable),
            _ => self.take(1, TokenKind::Operator),
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b'*' | b'$' | b'#') || c >= 0x80
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
