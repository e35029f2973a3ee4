//! urlskip Core Library
//!
//! This crate provides the pure, DOM-independent pieces of a content blocker's
//! scriptlet layer: the pattern micro-language used by scriptlets to match
//! strings, and the `urlskip` pipeline that derives a redirect target from a
//! tracking URL.
//!
//! # Architecture
//!
//! Both utilities are synchronous and side-effect free. Failures never cross
//! the public boundary as panics: pattern construction degrades to substring
//! matching, and the pipeline collapses every error to `None` ("leave the
//! request alone"). The `try_*` variants keep the error detail for callers
//! that want to inspect it.
//!
//! # Modules
//!
//! - `types`: Regex flag set shared by patterns and rules
//! - `pattern`: Pattern compilation and matching (`init_pattern`, `test_pattern`)
//! - `decode`: `atob`/`decodeURIComponent` equivalents used by decode steps
//! - `step`: Step token grammar
//! - `pipeline`: The `urlskip` transformation pipeline
//! - `rules`: Compiled urlskip rule sets

pub mod decode;
pub mod pattern;
pub mod pipeline;
pub mod rules;
pub mod step;
pub mod types;

// Re-export commonly used types
pub use pattern::{
    escape_regex, init_pattern, pattern_to_regex, test_pattern, PatternError, PatternOptions,
    PatternSpec,
};
pub use pipeline::{param_chain, try_url_skip, url_skip, Pipeline, PipelineError, RegexCache};
pub use rules::{Redirect, RuleError, RuleSet, UrlSkipRule};
pub use step::{parse_steps, DecodeKind, Step};
pub use types::RegexFlags;
