//! Prompt template resolution
//!
//! Templates use double-brace placeholders: `{{name}}`. Every placeholder
//! must resolve against the provided variables; an unresolved name or a
//! dangling `{{` is a `TemplateResolution` error.

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{ChainError, ChainResult};
use super::variables::Variables;

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").unwrap());

/// Substitute all `{{name}}` placeholders in `template` with values from
/// `variables`, stringifying non-string values.
pub fn resolve(template: &str, variables: &Variables) -> ChainResult<String> {
    // Any opening delimiter the pattern cannot parse is malformed. Checked
    // against the template itself, not the resolved output, so substituted
    // values are free to contain braces.
    let stripped = PLACEHOLDER_PATTERN.replace_all(template, "");
    if stripped.contains("{{") {
        return Err(ChainError::template(format!(
            "malformed placeholder in template: {}",
            template
        )));
    }

    let mut missing: Option<String> = None;

    let result = PLACEHOLDER_PATTERN.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match variables.get(name) {
            Some(value) => value_to_string(value),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });

    if let Some(name) = missing {
        return Err(ChainError::template(format!(
            "unresolved variable `{}`",
            name
        )));
    }

    Ok(result.into_owned())
}

/// Names of all placeholders appearing in a template.
pub fn placeholder_names(template: &str) -> Vec<String> {
    PLACEHOLDER_PATTERN
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Whether a raw string contains template placeholders worth resolving.
pub fn looks_like_template(value: &str) -> bool {
    PLACEHOLDER_PATTERN.is_match(value)
}

/// Render a JSON value as the plain text a prompt or message expects.
/// Strings pass through without quoting; everything else is JSON-encoded.
pub fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
