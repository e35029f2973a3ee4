//! Step token grammar
//!
//! A urlskip directive is a whitespace-separated list of steps, e.g.
//! `?url -base64 +https`. Each token is parsed once into a [`Step`].

use std::fmt;

use crate::pipeline::PipelineError;

/// Decoder applied by a `-` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeKind {
    /// `-base64`
    Base64,
    /// `-safebase64`
    SafeBase64,
    /// `-uricomponent`
    UriComponent,
}

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// `#` - text after the first `#`
    Hash,
    /// `&N` - name of the N-th (1-based) query parameter
    ParamName(usize),
    /// `+https` - force the https scheme
    EnforceHttps,
    /// `-base64`, `-safebase64`, `-uricomponent`
    Decode(DecodeKind),
    /// `-blocked` - allow redirecting requests that would be blocked
    AllowBlocked,
    /// `/…/` - first capture group of a regex
    Capture(String),
    /// `?name` - value of a named query parameter
    Param(String),
}

impl Step {
    /// Parse a single step token.
    pub fn parse(token: &str) -> Result<Self, PipelineError> {
        let unknown = || PipelineError::UnknownDirective(token.to_string());

        let Some(c0) = token.chars().next() else {
            return Err(unknown());
        };

        match c0 {
            '#' if token == "#" => Ok(Self::Hash),
            '&' => parse_index(&token[1..])
                .map(Self::ParamName)
                .ok_or_else(|| PipelineError::InvalidIndex(token.to_string())),
            '+' if token == "+https" => Ok(Self::EnforceHttps),
            '-' => match token {
                "-base64" => Ok(Self::Decode(DecodeKind::Base64)),
                "-safebase64" => Ok(Self::Decode(DecodeKind::SafeBase64)),
                "-uricomponent" => Ok(Self::Decode(DecodeKind::UriComponent)),
                "-blocked" => Ok(Self::AllowBlocked),
                _ => Err(unknown()),
            },
            '/' if token.len() >= 2 && token.ends_with('/') => {
                Ok(Self::Capture(token[1..token.len() - 1].to_string()))
            }
            '?' => Ok(Self::Param(token[1..].to_string())),
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash => f.write_str("#"),
            Self::ParamName(i) => write!(f, "&{i}"),
            Self::EnforceHttps => f.write_str("+https"),
            Self::Decode(DecodeKind::Base64) => f.write_str("-base64"),
            Self::Decode(DecodeKind::SafeBase64) => f.write_str("-safebase64"),
            Self::Decode(DecodeKind::UriComponent) => f.write_str("-uricomponent"),
            Self::AllowBlocked => f.write_str("-blocked"),
            Self::Capture(source) => write!(f, "/{source}/"),
            Self::Param(name) => write!(f, "?{name}"),
        }
    }
}

/// Split a directive value such as `?url ?to -base64` into step tokens.
pub fn parse_steps(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Leading decimal digits, like `parseInt`. Zero and missing are rejected.
fn parse_index(s: &str) -> Option<usize> {
    let s = s.strip_prefix('+').unwrap_or(s);
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse::<usize>().ok().filter(|&i| i >= 1)
}
