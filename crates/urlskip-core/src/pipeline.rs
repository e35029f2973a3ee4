//! The urlskip pipeline
//!
//! Derives the real destination of a tracking/redirector URL by threading a
//! single "current string" through a list of steps:
//!
//! ```text
//! https://t.example/r?to=aHR0cHM6Ly9leGFtcGxlLmNvbS8=
//!   ?to      -> aHR0cHM6Ly9leGFtcGxlLmNvbS8=
//!   -base64  -> https://example.com/
//! ```
//!
//! Steps run strictly left to right, exactly once. Any failing step aborts
//! the whole pipeline; the final string must be an http(s) URL.

use std::collections::HashMap;
use std::fmt;

use log::{debug, trace};
use regex::Regex;
use url::Url;

use crate::decode::{atob, decode_uri_component, safe_atob, DecodeError};
use crate::step::{DecodeKind, Step};
use crate::types::RegexFlags;

/// Error type for pipeline construction and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unknown directive: {0}")]
    UnknownDirective(String),
    #[error("Invalid parameter index: {0}")]
    InvalidIndex(String),
    #[error("Invalid regex /{pattern}/: {error}")]
    InvalidRegex { pattern: String, error: regex::Error },
    #[error("Invalid URL {input:?}: {error}")]
    InvalidUrl { input: String, error: url::ParseError },
    #[error("Parameter index {index} out of range ({count} parameters)")]
    ParamIndexOutOfRange { index: usize, count: usize },
    #[error("Missing parameter: {0}")]
    MissingParam(String),
    #[error("Embedded non-http scheme: {0}")]
    EmbeddedScheme(String),
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("Regex /{0}/ did not match")]
    NoMatch(String),
    #[error("Regex /{0}/ has no first capture group")]
    NoCaptureGroup(String),
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Blocked request without -blocked")]
    BlockedRequest,
}

// =============================================================================
// Regex Cache
// =============================================================================

/// Caller-owned memo of compiled capture regexes, keyed by regex source.
///
/// Not safe for concurrent mutation; share it across threads only behind
/// external synchronization.
#[derive(Debug, Default, Clone)]
pub struct RegexCache {
    regexes: HashMap<String, Regex>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the compiled regex for `source`, compiling it on first use.
    pub fn get_or_compile(&mut self, source: &str) -> Result<Regex, PipelineError> {
        if let Some(re) = self.regexes.get(source) {
            return Ok(re.clone());
        }
        let re = compile_capture(source)?;
        self.regexes.insert(source.to_string(), re.clone());
        Ok(re)
    }

    pub fn len(&self) -> usize {
        self.regexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regexes.is_empty()
    }

    pub fn clear(&mut self) {
        self.regexes.clear();
    }
}

fn compile_capture(source: &str) -> Result<Regex, PipelineError> {
    RegexFlags::empty().compile(source).map_err(|error| PipelineError::InvalidRegex {
        pattern: source.to_string(),
        error,
    })
}

// =============================================================================
// Pipeline
// =============================================================================

/// A step ready to run; capture steps carry their compiled regex.
#[derive(Debug, Clone)]
enum Stage {
    Hash,
    ParamName(usize),
    EnforceHttps,
    Decode(DecodeKind),
    AllowBlocked,
    Capture { source: String, re: Regex },
    Param(String),
}

impl Stage {
    fn new(step: Step, cache: Option<&mut RegexCache>) -> Result<Self, PipelineError> {
        Ok(match step {
            Step::Hash => Self::Hash,
            Step::ParamName(index) => Self::ParamName(index),
            Step::EnforceHttps => Self::EnforceHttps,
            Step::Decode(kind) => Self::Decode(kind),
            Step::AllowBlocked => Self::AllowBlocked,
            Step::Capture(source) => {
                let re = match cache {
                    Some(cache) => cache.get_or_compile(&source)?,
                    None => compile_capture(&source)?,
                };
                Self::Capture { source, re }
            }
            Step::Param(name) => Self::Param(name),
        })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => f.write_str("#"),
            Self::ParamName(i) => write!(f, "&{i}"),
            Self::EnforceHttps => f.write_str("+https"),
            Self::Decode(DecodeKind::Base64) => f.write_str("-base64"),
            Self::Decode(DecodeKind::SafeBase64) => f.write_str("-safebase64"),
            Self::Decode(DecodeKind::UriComponent) => f.write_str("-uricomponent"),
            Self::AllowBlocked => f.write_str("-blocked"),
            Self::Capture { source, .. } => write!(f, "/{source}/"),
            Self::Param(name) => write!(f, "?{name}"),
        }
    }
}

/// A parsed step list with its capture regexes compiled.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parse step tokens.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, PipelineError> {
        Self::build(tokens, None)
    }

    /// Parse step tokens, reusing and filling `cache` for capture regexes.
    pub fn parse_with_cache<S: AsRef<str>>(
        tokens: &[S],
        cache: &mut RegexCache,
    ) -> Result<Self, PipelineError> {
        Self::build(tokens, Some(cache))
    }

    /// Parse a whitespace-separated directive such as `?url -base64`.
    pub fn from_text(text: &str) -> Result<Self, PipelineError> {
        Self::parse(crate::step::parse_steps(text).as_slice())
    }

    fn build<S: AsRef<str>>(
        tokens: &[S],
        mut cache: Option<&mut RegexCache>,
    ) -> Result<Self, PipelineError> {
        let mut stages = Vec::with_capacity(tokens.len());
        for token in tokens {
            let step = Step::parse(token.as_ref())?;
            stages.push(Stage::new(step, cache.as_deref_mut())?);
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Whether the pipeline contains `-blocked`.
    pub fn allows_blocked(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| matches!(stage, Stage::AllowBlocked))
    }

    /// Run the pipeline against `url`.
    ///
    /// `blocked` tells whether the request would otherwise be blocked; such
    /// requests are only redirected when the pipeline opts in with `-blocked`.
    pub fn apply(&self, url: &str, blocked: bool) -> Result<String, PipelineError> {
        let mut redirect_blocked = false;
        let mut current = url.to_string();

        for stage in &self.stages {
            let input = current.as_str();
            current = match stage {
                Stage::Hash => match input.find('#') {
                    Some(pos) => input[pos + 1..].to_string(),
                    None => String::new(),
                },
                Stage::ParamName(index) => param_name(input, *index)?,
                Stage::EnforceHttps => enforce_https(input)?,
                Stage::Decode(kind) => match kind {
                    DecodeKind::Base64 => atob(input)?,
                    DecodeKind::SafeBase64 => safe_atob(input)?,
                    DecodeKind::UriComponent => decode_uri_component(input)?,
                },
                Stage::AllowBlocked => {
                    redirect_blocked = true;
                    continue;
                }
                Stage::Capture { source, re } => capture(source, re, input)?,
                Stage::Param(name) => param_value(input, name)?,
            };
            trace!("urlskip {stage} -> {current}");
        }

        let current = require_https(current)?;
        if blocked && !redirect_blocked {
            return Err(PipelineError::BlockedRequest);
        }
        Ok(current)
    }

    /// Run the pipeline, discarding error detail.
    pub fn skip(&self, url: &str, blocked: bool) -> Option<String> {
        match self.apply(url, blocked) {
            Ok(out) => Some(out),
            Err(e) => {
                debug!("urlskip {self} failed for {url}: {e}");
                None
            }
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            fmt::Display::fmt(stage, f)?;
        }
        Ok(())
    }
}

/// Apply urlskip steps to `url`; `None` means "leave the request alone".
pub fn url_skip<S: AsRef<str>>(
    url: &str,
    blocked: bool,
    steps: &[S],
    cache: Option<&mut RegexCache>,
) -> Option<String> {
    match try_url_skip(url, blocked, steps, cache) {
        Ok(out) => Some(out),
        Err(e) => {
            debug!("urlskip failed for {url}: {e}");
            None
        }
    }
}

/// Like [`url_skip`], but keeps the failure reason.
pub fn try_url_skip<S: AsRef<str>>(
    url: &str,
    blocked: bool,
    steps: &[S],
    cache: Option<&mut RegexCache>,
) -> Result<String, PipelineError> {
    Pipeline::build(steps, cache)?.apply(url, blocked)
}

// =============================================================================
// Step Implementations
// =============================================================================

fn parse_url(input: &str) -> Result<Url, PipelineError> {
    Url::parse(input).map_err(|error| PipelineError::InvalidUrl {
        input: input.to_string(),
        error,
    })
}

fn param_name(input: &str, index: usize) -> Result<String, PipelineError> {
    let url = parse_url(input)?;
    let count = url.query_pairs().count();
    let name = index
        .checked_sub(1)
        .and_then(|i| url.query_pairs().nth(i))
        .map(|(name, _)| name)
        .ok_or(PipelineError::ParamIndexOutOfRange { index, count })?;
    Ok(decode_uri_component(&name)?)
}

fn param_value(input: &str, name: &str) -> Result<String, PipelineError> {
    let url = parse_url(input)?;
    let value = url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
        .ok_or_else(|| PipelineError::MissingParam(name.to_string()))?;
    Ok(value.replace(' ', "%20"))
}

/// Follow a `?a?b` chain of parameter lookups starting from `href`.
///
/// Stops at the first link that is missing and returns the value reached so
/// far; `href` itself when `source` is empty or does not start with `?`.
pub fn param_chain(href: &str, source: &str) -> String {
    let mut current = href.to_string();
    let Some(names) = source.strip_prefix('?') else {
        return current;
    };
    for name in names.split('?') {
        match param_value(&current, name) {
            Ok(value) => current = value,
            Err(_) => break,
        }
    }
    current
}

fn enforce_https(input: &str) -> Result<String, PipelineError> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);

    let scheme_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    if scheme_len > 0 && rest[scheme_len..].starts_with("://") {
        return Err(PipelineError::EmbeddedScheme(rest[..scheme_len].to_string()));
    }

    Ok(format!("https://{rest}"))
}

fn capture(source: &str, re: &Regex, input: &str) -> Result<String, PipelineError> {
    let caps = re
        .captures(input)
        .ok_or_else(|| PipelineError::NoMatch(source.to_string()))?;
    caps.get(1)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| PipelineError::NoCaptureGroup(source.to_string()))
}

/// Final validation: the result must be an http(s) URL; http is upgraded.
fn require_https(current: String) -> Result<String, PipelineError> {
    let url = parse_url(&current)?;
    match url.scheme() {
        "https" => Ok(current),
        "http" => Ok(upgrade_scheme(current, url)),
        other => Err(PipelineError::UnsupportedScheme(other.to_string())),
    }
}

fn upgrade_scheme(current: String, mut url: Url) -> String {
    let start = current.len() - current.trim_start_matches(|c: char| c <= ' ').len();
    let scheme_end = start + 4;
    if current
        .get(start..scheme_end)
        .is_some_and(|s| s.eq_ignore_ascii_case("http"))
    {
        return format!("{}https{}", &current[..start], &current[scheme_end..]);
    }
    // Scheme text is interleaved with tabs or newlines; fall back to the
    // serialized form.
    match url.set_scheme("https") {
        Ok(()) => url.into(),
        Err(()) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skip(url: &str, blocked: bool, steps: &[&str]) -> Option<String> {
        url_skip(url, blocked, steps, None)
    }

    #[test]
    fn test_named_param() {
        assert_eq!(
            skip(
                "https://example.com/x?url=https%3A%2F%2Ftarget.example%2Fp",
                false,
                &["?url"]
            ),
            Some("https://target.example/p".to_string())
        );
    }

    #[test]
    fn test_nested_params() {
        let inner = "https%3A%2F%2Fb.example%2Fr%3Fto%3Dhttps%253A%252F%252Fdest.example%252F";
        let url = format!("https://a.example/r?url={inner}");
        assert_eq!(
            skip(&url, false, &["?url", "?to"]),
            Some("https://dest.example/".to_string())
        );
    }

    #[test]
    fn test_param_spaces_are_encoded() {
        assert_eq!(
            skip("https://a.example/?u=https://b.example/a+b", false, &["?u"]),
            Some("https://b.example/a%20b".to_string())
        );
    }

    #[test]
    fn test_missing_param_fails() {
        assert!(matches!(
            try_url_skip("https://a.example/?x=1", false, &["?url"], None),
            Err(PipelineError::MissingParam(_))
        ));
    }

    #[test]
    fn test_hash_without_fragment_fails() {
        assert_eq!(skip("https://example.com/a/b", false, &["#"]), None);
    }

    #[test]
    fn test_hash_extraction() {
        assert_eq!(
            skip("https://example.com/#https://target.example/x", false, &["#"]),
            Some("https://target.example/x".to_string())
        );
    }

    #[test]
    fn test_blocked_gate() {
        let url = "https://example.com/x?url=https%3A%2F%2Ftarget.example%2Fp";
        assert!(matches!(
            try_url_skip(url, true, &["?url"], None),
            Err(PipelineError::BlockedRequest)
        ));
        assert_eq!(
            skip(url, true, &["?url", "-blocked"]),
            Some("https://target.example/p".to_string())
        );
        assert_eq!(
            skip(url, true, &["-blocked", "?url"]),
            Some("https://target.example/p".to_string())
        );
    }

    #[test]
    fn test_http_result_is_upgraded() {
        assert_eq!(
            skip(
                "http://example.com/x?u=http%3A%2F%2Ftarget.example%2Fy",
                false,
                &["?u"]
            ),
            Some("https://target.example/y".to_string())
        );
    }

    #[test]
    fn test_upgrade_only_touches_scheme() {
        assert_eq!(
            upgrade_scheme(
                "HTTP://a.example/http".to_string(),
                Url::parse("http://a.example/http").unwrap()
            ),
            "https://a.example/http"
        );
    }

    #[test]
    fn test_unsupported_final_scheme() {
        assert!(matches!(
            try_url_skip("https://a.example/?u=ftp%3A%2F%2Fb.example%2F", false, &["?u"], None),
            Err(PipelineError::UnsupportedScheme(_))
        ));
        assert_eq!(
            skip("https://a.example/?u=javascript:alert(1)", false, &["?u"]),
            None
        );
    }

    #[test]
    fn test_unknown_directive_aborts() {
        let url = "https://example.com/x?url=https%3A%2F%2Ftarget.example%2Fp";
        assert_eq!(skip(url, false, &["%bogus"]), None);
        assert!(matches!(
            try_url_skip(url, false, &["?url", "%bogus"], None),
            Err(PipelineError::UnknownDirective(_))
        ));
    }

    #[test]
    fn test_param_name_by_index() {
        assert_eq!(
            skip(
                "https://www.pixiv.net/jump.php?https%3A%2F%2Fexample.com%2Fpage",
                false,
                &["&1"]
            ),
            Some("https://example.com/page".to_string())
        );
        assert_eq!(
            skip("https://a.example/?a=1&https%3A%2F%2Fb.example%2F", false, &["&2"]),
            Some("https://b.example/".to_string())
        );
        assert!(matches!(
            try_url_skip("https://a.example/?a=1", false, &["&2"], None),
            Err(PipelineError::ParamIndexOutOfRange { index: 2, count: 1 })
        ));
    }

    #[test]
    fn test_param_name_is_decoded_twice() {
        // Form decoding yields `https%3A%2F%2Fb.example%2F`, then the name
        // itself is percent-decoded
        assert_eq!(
            skip("https://a.example/?https%253A%252F%252Fb.example%252F", false, &["&1"]),
            Some("https://b.example/".to_string())
        );
        // `%25zz` form-decodes to `%zz`, which is not a valid escape
        assert!(matches!(
            try_url_skip("https://a.example/?%25zz", false, &["&1"], None),
            Err(PipelineError::Decode(DecodeError::MalformedEscape(0)))
        ));
        assert_eq!(skip("https://a.example/?%25zz", false, &["&1"]), None);
    }

    #[test]
    fn test_capture_and_enforce_https() {
        let url = "https://dts.podtrac.com/redirect.mp3/chrt.fm/track/9EE2G/traffic.megaphone.fm/ABC123.mp3?updated=1";
        assert_eq!(
            skip(url, false, &[r"/\/redirect\.mp3\/(.*?\.mp3\b)/", "+https"]),
            Some("https://chrt.fm/track/9EE2G/traffic.megaphone.fm/ABC123.mp3".to_string())
        );
    }

    #[test]
    fn test_capture_failures() {
        assert!(matches!(
            try_url_skip("https://a.example/", false, &["/zzz(\\d+)/"], None),
            Err(PipelineError::NoMatch(_))
        ));
        assert!(matches!(
            try_url_skip("https://a.example/", false, &["/example/"], None),
            Err(PipelineError::NoCaptureGroup(_))
        ));
        assert!(matches!(
            try_url_skip("https://a.example/", false, &["/a|(b)/"], None),
            Err(PipelineError::NoCaptureGroup(_))
        ));
        assert!(matches!(
            try_url_skip("https://a.example/", false, &["/(/"], None),
            Err(PipelineError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_enforce_https() {
        assert_eq!(enforce_https("example.com/a").unwrap(), "https://example.com/a");
        assert_eq!(enforce_https("http://example.com/a").unwrap(), "https://example.com/a");
        assert_eq!(enforce_https("https://example.com/a").unwrap(), "https://example.com/a");
        assert!(matches!(
            enforce_https("http://ftp://example.com/"),
            Err(PipelineError::EmbeddedScheme(_))
        ));
        assert!(enforce_https("javascript://x").is_err());
    }

    #[test]
    fn test_base64_steps() {
        assert_eq!(
            skip(
                "https://t.example/r?to=aHR0cHM6Ly9leGFtcGxlLmNvbS8=",
                false,
                &["?to", "-base64"]
            ),
            Some("https://example.com/".to_string())
        );
        // "https://example.com/?a=>>" has '+' in standard base64
        let safe = "aHR0cHM6Ly9leGFtcGxlLmNvbS8_YT0-Pg";
        assert_eq!(
            skip(&format!("https://t.example/r#{safe}"), false, &["#", "-safebase64"]),
            Some("https://example.com/?a=>>".to_string())
        );
        assert_eq!(skip("https://t.example/r?to=%%%", false, &["?to", "-base64"]), None);
    }

    #[test]
    fn test_uricomponent_step() {
        assert_eq!(
            skip(
                "https://t.example/r#https%3A%2F%2Fexample.com%2F",
                false,
                &["#", "-uricomponent"]
            ),
            Some("https://example.com/".to_string())
        );
        assert!(matches!(
            try_url_skip("https://t.example/r#%E0%A4%A", false, &["#", "-uricomponent"], None),
            Err(PipelineError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_steps_validate_input() {
        let empty: [&str; 0] = [];
        assert_eq!(
            skip("https://example.com/", false, &empty),
            Some("https://example.com/".to_string())
        );
        assert_eq!(skip("not a url", false, &empty), None);
    }

    #[test]
    fn test_result_is_raw_string() {
        // The final value is returned as written, not re-serialized
        assert_eq!(
            skip("https://a.example/?u=https://B.example", false, &["?u"]),
            Some("https://B.example".to_string())
        );
    }

    #[test]
    fn test_cache_is_reused() {
        let mut cache = RegexCache::new();
        let steps = [r"/\/go\/(.+)$/", "+https"];
        let first = url_skip("https://a.example/go/b.example/x", false, &steps, Some(&mut cache));
        assert_eq!(first, Some("https://b.example/x".to_string()));
        assert_eq!(cache.len(), 1);

        let second = url_skip("https://a.example/go/c.example/y", false, &steps, Some(&mut cache));
        assert_eq!(second, Some("https://c.example/y".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_keys_by_source() {
        let mut cache = RegexCache::new();
        let steps = ["/a=([^&]+)/", "-uricomponent", "/^x(.+)$/"];
        let out = url_skip(
            "https://a.example/?a=xhttps%3A%2F%2Fb.example%2F",
            false,
            &steps,
            Some(&mut cache),
        );
        assert_eq!(out, Some("https://b.example/".to_string()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_param_chain() {
        let href = "https://a.example/?url=https%3A%2F%2Fb.example%2F%3Fto%3Dhttps%253A%252F%252Fc.example%252F";
        assert_eq!(param_chain(href, "?url?to"), "https://c.example/");
        assert_eq!(param_chain(href, "?url"), "https://b.example/?to=https%3A%2F%2Fc.example%2F");
        // A missing link stops at the last value reached
        assert_eq!(param_chain(href, "?url?nope"), "https://b.example/?to=https%3A%2F%2Fc.example%2F");
        assert_eq!(param_chain(href, "?nope"), href);
        assert_eq!(param_chain(href, ""), href);
    }

    #[test]
    fn test_pipeline_display_and_reuse() {
        let pipeline = Pipeline::from_text("?url  -base64 -blocked").unwrap();
        assert_eq!(pipeline.to_string(), "?url -base64 -blocked");
        assert_eq!(pipeline.len(), 3);
        assert!(pipeline.allows_blocked());

        let out = pipeline.skip("https://t.example/?url=aHR0cHM6Ly9hLmV4YW1wbGUv", true);
        assert_eq!(out, Some("https://a.example/".to_string()));
        assert_eq!(pipeline.skip("https://t.example/", true), None);
    }

    #[test]
    fn test_capture_stage_keeps_source() {
        let pipeline = Pipeline::parse([r"/\/(\d+)\//", "+https"].as_slice()).unwrap();
        assert_eq!(pipeline.to_string(), r"/\/(\d+)\// +https");

        match pipeline.apply("https://a.example/x/", false) {
            Err(PipelineError::NoMatch(source)) => assert_eq!(source, r"\/(\d+)\/"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_capture_digits_are_ascii() {
        assert_eq!(
            skip("https://a.example/id/\u{661}\u{662}/b.example", false, &[r"/\/id\/\d+\/(.+)$/", "+https"]),
            None
        );
        assert_eq!(
            skip("https://a.example/id/12/b.example", false, &[r"/\/id\/\d+\/(.+)$/", "+https"]),
            Some("https://b.example".to_string())
        );
    }
}
