//! Shared type definitions
//!
//! Flag sets follow the JavaScript regex literal syntax (`/body/gimsu`) used
//! by filter authors.

use std::fmt;

use regex::{Regex, RegexBuilder};

// =============================================================================
// Regex Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags accepted after a `/body/` regex literal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegexFlags: u8 {
        /// `g` - global; matching is stateless here so it has no effect
        const GLOBAL = 1 << 0;
        /// `i` - case-insensitive
        const IGNORE_CASE = 1 << 1;
        /// `m` - `^`/`$` match at line boundaries
        const MULTI_LINE = 1 << 2;
        /// `s` - `.` matches newlines
        const DOT_ALL = 1 << 3;
        /// `u` - unicode; always on for the regex engine
        const UNICODE = 1 << 4;
    }
}

impl RegexFlags {
    /// Parse a flag string such as `"gi"`.
    /// Returns None if any character is not one of `gimsu`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut flags = Self::empty();
        for c in s.chars() {
            flags |= match c {
                'g' => Self::GLOBAL,
                'i' => Self::IGNORE_CASE,
                'm' => Self::MULTI_LINE,
                's' => Self::DOT_ALL,
                'u' => Self::UNICODE,
                _ => return None,
            };
        }
        Some(flags)
    }

    /// Compile `source` with these flags.
    ///
    /// `\d`, `\w` and `\b` keep their ASCII meaning, as in a JavaScript regex.
    pub fn compile(self, source: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(&ascii_classes(source))
            .case_insensitive(self.contains(Self::IGNORE_CASE))
            .multi_line(self.contains(Self::MULTI_LINE))
            .dot_matches_new_line(self.contains(Self::DOT_ALL))
            .build()
    }
}

/// Rewrite the Perl classes whose meaning differs from the regex crate's
/// Unicode default. `\B` stays Unicode: `(?-u:\B)` is rejected for `&str`.
fn ascii_classes(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_class = false;
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let Some(next) = chars.next() else {
                    out.push(c);
                    break;
                };
                let replacement = match (next, in_class) {
                    ('d', false) => r"(?-u:\d)",
                    ('w', false) => r"(?-u:\w)",
                    ('b', false) => r"(?-u:\b)",
                    ('D', false) => "[^0-9]",
                    ('W', false) => "[^0-9A-Za-z_]",
                    ('d', true) => "0-9",
                    ('w', true) => "0-9A-Za-z_",
                    ('D', true) => "[^0-9]",
                    ('W', true) => "[^0-9A-Za-z_]",
                    _ => {
                        out.push(c);
                        out.push(next);
                        continue;
                    }
                };
                out.push_str(replacement);
            }
            '[' if !in_class => {
                in_class = true;
                out.push(c);
            }
            ']' if in_class => {
                in_class = false;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for RegexFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, c) in [
            (Self::GLOBAL, 'g'),
            (Self::IGNORE_CASE, 'i'),
            (Self::MULTI_LINE, 'm'),
            (Self::DOT_ALL, 's'),
            (Self::UNICODE, 'u'),
        ] {
            if self.contains(flag) {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        assert_eq!(RegexFlags::parse(""), Some(RegexFlags::empty()));
        assert_eq!(
            RegexFlags::parse("gi"),
            Some(RegexFlags::GLOBAL | RegexFlags::IGNORE_CASE)
        );
        assert_eq!(RegexFlags::parse("x"), None);
        assert_eq!(RegexFlags::parse("iy"), None);
    }

    #[test]
    fn test_display_roundtrip_order() {
        let flags = RegexFlags::parse("usmig").unwrap();
        assert_eq!(flags.to_string(), "gimsu");
    }

    #[test]
    fn test_compile_respects_flags() {
        let re = RegexFlags::IGNORE_CASE.compile("abc").unwrap();
        assert!(re.is_match("xABCx"));

        let re = RegexFlags::empty().compile("abc").unwrap();
        assert!(!re.is_match("ABC"));

        let re = RegexFlags::DOT_ALL.compile("a.b").unwrap();
        assert!(re.is_match("a\nb"));

        let re = RegexFlags::MULTI_LINE.compile("^b$").unwrap();
        assert!(re.is_match("a\nb\nc"));
    }

    #[test]
    fn test_compile_perl_classes_are_ascii() {
        // Arabic-Indic digits are not \d
        let re = RegexFlags::empty().compile(r"^\d+$").unwrap();
        assert!(re.is_match("123"));
        assert!(!re.is_match("\u{661}\u{662}"));

        let re = RegexFlags::empty().compile(r"^\D$").unwrap();
        assert!(re.is_match("\u{661}"));

        let re = RegexFlags::empty().compile(r"^\w+$").unwrap();
        assert!(!re.is_match("café"));
        let re = RegexFlags::empty().compile(r"^[\w.]+$").unwrap();
        assert!(re.is_match("a_b.c"));
        assert!(!re.is_match("é"));

        let re = RegexFlags::empty().compile(r"\bmp3\b").unwrap();
        assert!(re.is_match("x.mp3?y"));
        assert!(re.is_match("émp3"));
    }

    #[test]
    fn test_ascii_classes_keeps_other_escapes() {
        assert_eq!(ascii_classes(r"a\.b\\d"), r"a\.b\\d");
        assert_eq!(ascii_classes(r"[\d\W]"), r"[0-9[^0-9A-Za-z_]]");
        assert_eq!(ascii_classes(r"\d[a]\w"), r"(?-u:\d)[a](?-u:\w)");
    }
}
