//! WebAssembly bindings for urlskip

use std::sync::OnceLock;
use wasm_bindgen::prelude::*;
use urlskip_core::{
    parse_steps,
    pattern::parse_flags,
    url_skip as core_url_skip,
    PatternOptions, PatternSpec, RuleSet, Step,
};

static RULE_SET: OnceLock<RuleSet> = OnceLock::new();

/// Apply a whitespace-separated urlskip directive to `url`.
#[wasm_bindgen]
pub fn url_skip(url: &str, blocked: bool, steps: &str) -> Option<String> {
    core_url_skip(url, blocked, parse_steps(steps).as_slice(), None)
}

/// Apply an array of step tokens to `url`.
#[wasm_bindgen]
pub fn url_skip_steps(url: &str, blocked: bool, steps: JsValue) -> Result<Option<String>, JsValue> {
    let array = js_sys::Array::from(&steps);
    let mut tokens = Vec::with_capacity(array.length() as usize);
    for value in array.iter() {
        let token = value
            .as_string()
            .ok_or_else(|| JsValue::from_str("Step must be a string"))?;
        tokens.push(token);
    }
    Ok(core_url_skip(url, blocked, tokens.as_slice(), None))
}

#[wasm_bindgen]
pub fn test_pattern(
    pattern: &str,
    haystack: &str,
    can_negate: bool,
    flags: Option<String>,
) -> Result<bool, JsValue> {
    let flags = flags
        .as_deref()
        .map(parse_flags)
        .transpose()
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let options = PatternOptions { can_negate, flags };
    Ok(PatternSpec::new(pattern, &options).test(haystack))
}

/// Normalized step tokens, or an error naming the first invalid one.
#[wasm_bindgen]
pub fn parse_directive(text: &str) -> Result<JsValue, JsValue> {
    let result = js_sys::Array::new();
    for token in parse_steps(text) {
        let step = Step::parse(token).map_err(|e| JsValue::from_str(&e.to_string()))?;
        result.push(&JsValue::from_str(&step.to_string()));
    }
    Ok(result.into())
}

#[wasm_bindgen]
pub fn load_rules(rules_json: &str) -> Result<JsValue, JsValue> {
    if RULE_SET.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }

    let set = RuleSet::from_json(rules_json)
        .map_err(|e| JsValue::from_str(&format!("Failed to load rules: {}", e)))?;

    if set.skipped() > 0 {
        web_sys::console::warn_1(&JsValue::from_str(&format!(
            "urlskip: skipped {} invalid rules",
            set.skipped()
        )));
    }

    let stats = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&stats, &"rules".into(), &JsValue::from(set.len() as u32));
    let _ = js_sys::Reflect::set(&stats, &"skipped".into(), &JsValue::from(set.skipped() as u32));

    RULE_SET.set(set)
        .map_err(|_| JsValue::from_str("Failed to set rule state"))?;

    Ok(stats.into())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    RULE_SET.get().is_some()
}

/// `{ ruleIndex, url }` for the first matching rule, or `null`.
#[wasm_bindgen]
pub fn find_redirect(url: &str) -> JsValue {
    let Some(set) = RULE_SET.get() else {
        return JsValue::NULL;
    };
    match set.find_redirect(url) {
        Some(redirect) => {
            let result = js_sys::Object::new();
            let _ = js_sys::Reflect::set(&result, &"ruleIndex".into(), &JsValue::from(redirect.rule_index as u32));
            let _ = js_sys::Reflect::set(&result, &"url".into(), &JsValue::from_str(&redirect.url));
            result.into()
        }
        None => JsValue::NULL,
    }
}
