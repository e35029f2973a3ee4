//! Pattern micro-language
//!
//! Scriptlets accept needles written either as plain substrings or as
//! `/regex/flags` literals, optionally negated with a leading `!`. A pattern
//! is compiled once into a [`PatternSpec`] and then tested many times.

use log::debug;
use regex::Regex;

use crate::types::RegexFlags;

/// Error type for pattern compilation.
#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid regex /{pattern}/: {error}")]
    InvalidRegex { pattern: String, error: regex::Error },
    #[error("Invalid regex flags: {0}")]
    InvalidFlags(String),
}

/// Options for [`init_pattern`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternOptions {
    /// Allow a leading `!` to invert the match.
    pub can_negate: bool,
    /// Default flags; when set, plain text is compiled as an escaped regex.
    pub flags: Option<RegexFlags>,
}

impl PatternOptions {
    pub fn negatable() -> Self {
        Self {
            can_negate: true,
            flags: None,
        }
    }

    pub fn with_flags(mut self, flags: RegexFlags) -> Self {
        self.flags = Some(flags);
        self
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    MatchAll,
    Regex(Regex),
    Substring(String),
}

/// A compiled pattern. Immutable; testing it has no side effects.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    strategy: Strategy,
    expect: bool,
}

impl PatternSpec {
    /// Compile a raw pattern string.
    ///
    /// Never fails: a `/…/` literal whose body the regex engine rejects is
    /// treated as literal text, like any other non-literal pattern.
    pub fn new(pattern: &str, options: &PatternOptions) -> Self {
        if pattern.is_empty() {
            return Self {
                strategy: Strategy::MatchAll,
                expect: true,
            };
        }

        let (expect, body) = match pattern.strip_prefix('!') {
            Some(rest) if options.can_negate => (false, rest),
            _ => (true, pattern),
        };

        if let Some((source, inline)) = split_regex_literal(body) {
            let flags = if inline.is_empty() {
                options.flags.unwrap_or_default()
            } else {
                inline
            };
            match flags.compile(source) {
                Ok(re) => {
                    return Self {
                        strategy: Strategy::Regex(re),
                        expect,
                    }
                }
                Err(e) => debug!("pattern {body:?} is not a valid regex, using literal text: {e}"),
            }
        }

        if let Some(flags) = options.flags {
            match flags.compile(&escape_regex(body)) {
                Ok(re) => {
                    return Self {
                        strategy: Strategy::Regex(re),
                        expect,
                    }
                }
                Err(e) => debug!("escaped pattern {body:?} failed to compile: {e}"),
            }
        }

        Self {
            strategy: Strategy::Substring(body.to_string()),
            expect,
        }
    }

    /// Test a haystack against the pattern.
    #[inline]
    pub fn test(&self, haystack: &str) -> bool {
        match &self.strategy {
            Strategy::MatchAll => true,
            Strategy::Regex(re) => re.is_match(haystack) == self.expect,
            Strategy::Substring(needle) => haystack.contains(needle.as_str()) == self.expect,
        }
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self.strategy, Strategy::MatchAll)
    }

    pub fn regex(&self) -> Option<&Regex> {
        match &self.strategy {
            Strategy::Regex(re) => Some(re),
            _ => None,
        }
    }

    pub fn substring(&self) -> Option<&str> {
        match &self.strategy {
            Strategy::Substring(s) => Some(s),
            _ => None,
        }
    }

    /// Polarity: false when the pattern was negated.
    pub fn expect(&self) -> bool {
        self.expect
    }
}

/// Compile a pattern (`initPattern`).
pub fn init_pattern(pattern: &str, options: &PatternOptions) -> PatternSpec {
    PatternSpec::new(pattern, options)
}

/// Evaluate a compiled pattern (`testPattern`).
#[inline]
pub fn test_pattern(spec: &PatternSpec, haystack: &str) -> bool {
    spec.test(haystack)
}

/// Convert a pattern straight into a regex.
///
/// The empty pattern becomes `^`, which matches everything. Unlike
/// [`init_pattern`], an invalid `/…/` body is reported rather than degraded.
pub fn pattern_to_regex(pattern: &str, flags: Option<RegexFlags>) -> Result<Regex, PatternError> {
    let flags_or_default = flags.unwrap_or_default();
    let (source, flags) = if pattern.is_empty() {
        ("^".to_string(), RegexFlags::empty())
    } else if let Some((source, inline)) = split_regex_literal(pattern) {
        let flags = if inline.is_empty() { flags_or_default } else { inline };
        (source.to_string(), flags)
    } else {
        (escape_regex(pattern), flags_or_default)
    };

    flags.compile(&source).map_err(|error| PatternError::InvalidRegex {
        pattern: source,
        error,
    })
}

/// Escape `s` so it matches itself literally.
pub fn escape_regex(s: &str) -> String {
    regex::escape(s)
}

/// Parse a flag string, e.g. from a command line argument.
pub fn parse_flags(s: &str) -> Result<RegexFlags, PatternError> {
    RegexFlags::parse(s).ok_or_else(|| PatternError::InvalidFlags(s.to_string()))
}

/// Split `/body/flags` into its body and flags.
///
/// Mirrors `^/(.+)/([gimsu]*)$`: the greedy body ends at the last `/`, and
/// everything after it must be flag characters.
fn split_regex_literal(s: &str) -> Option<(&str, RegexFlags)> {
    let rest = s.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    if end == 0 {
        return None;
    }
    let flags = RegexFlags::parse(&rest[end + 1..])?;
    Some((&rest[..end], flags))
}
