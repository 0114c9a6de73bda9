//! Text normalization primitives shared by the format handlers.

/// Compacts every run of ASCII spaces in `s` into a single space, and trims leading and trailing spaces.
///
/// Only the space character itself (`0x20`) is considered: tabs, newlines and other whitespace are preserved as-is,
/// since several handlers treat newlines as command separators.
pub fn compact_whitespaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split(' ').filter(|word| !word.is_empty()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// How a quoted literal is delimited.
#[derive(Clone, Copy, Debug)]
pub(crate) struct QuoteRules {
    /// Whether a backslash escapes the character that follows it.
    pub backslash_escapes: bool,

    /// Whether a doubled quote character (`''`) stands for a literal quote instead of ending the literal.
    pub doubled_quotes: bool,
}

/// Scans a quoted literal whose opening quote sits at `start`, returning the offset just past its closing quote.
///
/// End of input acts as an implicit terminator, so the returned offset never exceeds `buf.len()`.
pub(crate) fn scan_quoted(buf: &[u8], start: usize, rules: QuoteRules) -> usize {
    let quote = buf[start];
    let mut i = start + 1;

    while i < buf.len() {
        let b = buf[i];
        if b == b'\\' && rules.backslash_escapes {
            i += 2;
            continue;
        }

        if b == quote {
            if rules.doubled_quotes && buf.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }

            return i + 1;
        }

        i += 1;
    }

    buf.len()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn compact() {
        let cases = vec![
            ("", ""),
            ("   ", ""),
            (" ", ""),
            ("a", "a"),
            ("abc", "abc"),
            (" a   b  ", "a b"),
            ("   leading", "leading"),
            ("trailing   ", "trailing"),
            ("one two", "one two"),
            ("one  two   three    four", "one two three four"),
            ("ends with a long run      ", "ends with a long run"),
            ("tabs\t\tstay", "tabs\t\tstay"),
            ("new\n  line", "new\n line"),
            ("SELECT  *   FROM t", "SELECT * FROM t"),
        ];

        for (input, expected) in cases {
            assert_eq!(compact_whitespaces(input), expected, "Failed for input: {:?}", input);
        }
    }

    const ESCAPES: QuoteRules = QuoteRules {
        backslash_escapes: true,
        doubled_quotes: true,
    };

    const NO_ESCAPES: QuoteRules = QuoteRules {
        backslash_escapes: false,
        doubled_quotes: true,
    };

    #[test]
    fn quoted_backslash_modes() {
        let input = br"'it\'s' x";

        let escaped = scan_quoted(input, 0, ESCAPES);
        assert_eq!(escaped, 7);

        let literal = scan_quoted(input, 0, NO_ESCAPES);
        assert_eq!(literal, 5);
    }

    #[test]
    fn quoted_doubled_quote() {
        let input = b"'it''s' rest";
        assert_eq!(scan_quoted(input, 0, NO_ESCAPES), 7);

        let no_doubling = QuoteRules {
            backslash_escapes: false,
            doubled_quotes: false,
        };
        assert_eq!(scan_quoted(input, 0, no_doubling), 4);
    }

    #[test]
    fn quoted_unterminated() {
        assert_eq!(scan_quoted(b"'never closed", 0, ESCAPES), 13);

        // A trailing backslash must not push the scan past the end of the input.
        assert_eq!(scan_quoted(b"'abc\\", 0, ESCAPES), 5);
    }

    #[test]
    fn quoted_from_offset() {
        let input = b"SET k \"a b\" c";
        assert_eq!(scan_quoted(input, 6, ESCAPES), 11);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]
        #[test]
        fn property_test_compact_idempotent(input in "[ a-c\t]{0,64}") {
            let once = compact_whitespaces(&input);
            prop_assert_eq!(compact_whitespaces(&once), once.clone());
            prop_assert!(once.len() <= input.len());
            prop_assert!(!once.starts_with(' ') && !once.ends_with(' '));
            prop_assert!(!once.contains("  "));
        }

        #[test]
        fn property_test_scan_quoted_in_bounds(input in proptest::collection::vec(any::<u8>(), 1..128), escapes in any::<bool>()) {
            let rules = QuoteRules { backslash_escapes: escapes, doubled_quotes: true };
            let found = scan_quoted(&input, 0, rules);
            prop_assert!(found <= input.len());
            prop_assert!(found >= 1);
        }
    }
}
