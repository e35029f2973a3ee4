//! Compiled urlskip rule sets
//!
//! Rulesets ship urlskip filters in a compiled JSON form:
//!
//! ```json
//! [{ "re": "^https://t\\.example/r\\?", "c": false,
//!    "hostnames": ["t.example"], "steps": ["?url"] }]
//! ```
//!
//! A rule applies when its regex matches the request URL and, if it lists
//! hostnames, the request hostname is one of them or a subdomain of one.

use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::pipeline::{Pipeline, PipelineError, RegexCache};
use crate::types::RegexFlags;

/// Error type for rule compilation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid rule JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid rule regex /{pattern}/: {error}")]
    InvalidRegex { pattern: String, error: regex::Error },
    #[error("Invalid rule steps: {0}")]
    Pipeline(#[from] PipelineError),
}

/// A urlskip rule in its compiled JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlSkipRule {
    /// URL regex.
    pub re: String,
    /// Match case; the regex is case-insensitive otherwise.
    #[serde(default)]
    pub c: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostnames: Option<Vec<String>>,
    pub steps: Vec<String>,
}

/// The redirect found for a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub rule_index: usize,
    pub url: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    index: usize,
    re: Regex,
    hostnames: Option<Vec<String>>,
    pipeline: Pipeline,
}

impl CompiledRule {
    fn matches_hostname(&self, host: &str) -> bool {
        let Some(hostnames) = &self.hostnames else {
            return true;
        };
        hostnames.iter().any(|hn| is_same_or_subdomain(host, hn))
    }
}

/// A set of compiled urlskip rules, evaluated in order.
#[derive(Debug, Default, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    cache: RegexCache,
    seen: usize,
    skipped: usize,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a rule set from a JSON array of rules.
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let mut set = Self::new();
        set.extend_json(json)?;
        Ok(set)
    }

    /// Append the rules of another JSON array.
    ///
    /// Rules that fail to compile are skipped and counted in
    /// [`RuleSet::skipped`].
    pub fn extend_json(&mut self, json: &str) -> Result<(), RuleError> {
        let rules: Vec<UrlSkipRule> = serde_json::from_str(json)?;
        self.extend(&rules);
        Ok(())
    }

    pub fn extend<'r>(&mut self, rules: impl IntoIterator<Item = &'r UrlSkipRule>) {
        for rule in rules {
            if let Err(e) = self.add(rule) {
                warn!("skipping urlskip rule {:?}: {}", rule.re, e);
            }
        }
    }

    /// Compile and append a single rule.
    pub fn add(&mut self, rule: &UrlSkipRule) -> Result<(), RuleError> {
        let index = self.seen;
        self.seen += 1;

        let compiled = self.compile(index, rule);
        match compiled {
            Ok(compiled) => {
                self.rules.push(compiled);
                Ok(())
            }
            Err(e) => {
                self.skipped += 1;
                Err(e)
            }
        }
    }

    fn compile(&mut self, index: usize, rule: &UrlSkipRule) -> Result<CompiledRule, RuleError> {
        let flags = if rule.c {
            RegexFlags::empty()
        } else {
            RegexFlags::IGNORE_CASE
        };
        let re = flags.compile(&rule.re).map_err(|error| RuleError::InvalidRegex {
                pattern: rule.re.clone(),
                error,
            })?;
        let pipeline = Pipeline::parse_with_cache(rule.steps.as_slice(), &mut self.cache)?;
        let hostnames = rule
            .hostnames
            .as_ref()
            .map(|list| list.iter().map(|hn| hn.to_ascii_lowercase()).collect());

        Ok(CompiledRule {
            index,
            re,
            hostnames,
            pipeline,
        })
    }

    /// Number of usable rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of rules dropped because they failed to compile.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Find the first rule that yields a redirect for `url`.
    ///
    /// `url` is normalized first; rules see its serialized form. The request
    /// is treated as not blocked.
    pub fn find_redirect(&self, url: &str) -> Option<Redirect> {
        let parsed = Url::parse(url).ok()?;
        let href = parsed.as_str();
        let host = parsed.host_str().unwrap_or_default();

        self.rules
            .iter()
            .filter(|rule| rule.re.is_match(href))
            .filter(|rule| rule.matches_hostname(host))
            .find_map(|rule| {
                rule.pipeline.skip(href, false).map(|out| Redirect {
                    rule_index: rule.index,
                    url: out,
                })
            })
    }
}

fn is_same_or_subdomain(host: &str, hostname: &str) -> bool {
    match host.strip_suffix(hostname) {
        Some("") => true,
        Some(prefix) => prefix.ends_with('.'),
        None => false,
    }
}
