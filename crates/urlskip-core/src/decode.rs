//! String decoders for pipeline decode steps
//!
//! These follow the browser primitives filter authors rely on: `atob` with
//! its forgiving base64 grammar, and the strict `decodeURIComponent`.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use percent_encoding::percent_decode_str;

/// Error type for decode steps.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Malformed percent escape at byte {0}")]
    MalformedEscape(usize),
    #[error("Percent-decoded bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Padding optional, trailing bits ignored.
const FORGIVING: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode base64 into a binary string, one `char` per decoded byte.
pub fn atob(input: &str) -> Result<String, DecodeError> {
    let compact: String = input
        .chars()
        .filter(|c| !matches!(*c, ' ' | '\t' | '\n' | '\x0c' | '\r'))
        .collect();
    let bytes = FORGIVING.decode(compact.as_bytes())?;
    Ok(bytes.into_iter().map(char::from).collect())
}

/// Decode URL-safe base64 (`-` and `_` in place of `+` and `/`).
pub fn safe_atob(input: &str) -> Result<String, DecodeError> {
    let standard: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    atob(&standard)
}

/// Percent-decode a URI component.
///
/// Every `%` must introduce two hex digits, and the decoded bytes must form
/// valid UTF-8.
pub fn decode_uri_component(input: &str) -> Result<String, DecodeError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(DecodeError::MalformedEscape(i));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| DecodeError::InvalidUtf8)
}
