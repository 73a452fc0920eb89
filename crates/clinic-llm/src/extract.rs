//! Best-effort structured extraction from generation output.
//!
//! The backend may wrap JSON in prose, markdown fences, or truncate it
//! mid-string. Every consumer goes through the same three tiers:
//!
//! 1. strict `serde_json` parse of the whole response;
//! 2. fence stripping plus balanced-delimiter extraction, then parse;
//! 3. field-by-field regex fallback ([`string_field`] / [`string_list`])
//!    for a reduced-fidelity result.

use regex::Regex;
use serde::de::DeserializeOwned;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("no JSON value found in response text")]
    NoJsonFound,

    #[error("extracted JSON failed to parse: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parse the first JSON object in `text` into `T`, tolerating surrounding
/// prose and markdown fencing.
pub fn parse_object<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let trimmed = strip_fences(text);
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }
    let candidate = balanced_span(trimmed, '{', '}').ok_or(ExtractError::NoJsonFound)?;
    Ok(serde_json::from_str(candidate)?)
}

/// Parse the first JSON array in `text` into `T`, same tolerance rules.
pub fn parse_array<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let trimmed = strip_fences(text);
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }
    let candidate = balanced_span(trimmed, '[', ']').ok_or(ExtractError::NoJsonFound)?;
    Ok(serde_json::from_str(candidate)?)
}

/// Strip a leading/trailing markdown code fence if present.
pub fn strip_fences(text: &str) -> &str {
    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        trimmed = rest;
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest;
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest;
    }
    trimmed.trim()
}

/// First balanced `open`..`close` span, honoring JSON string literals and
/// escapes so braces inside strings don't terminate the scan. Returns `None`
/// when the delimiter never opens or never closes (truncated output).
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Regex fallback: value of a `"name": "..."` string field, even inside
/// truncated JSON.
pub fn string_field(text: &str, name: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"([^"]*)""#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .map(|captures| captures[1].to_string())
        .filter(|value| !value.is_empty())
}

/// Regex fallback: items of a `"name": ["...", ...]` string array.
pub fn string_list(text: &str, name: &str) -> Option<Vec<String>> {
    let pattern = format!(r#"(?s)"{}"\s*:\s*\[(.*?)\]"#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let captures = re.captures(text)?;
    let body = captures[1].trim().to_string();
    if body.is_empty() {
        return Some(Vec::new());
    }
    let item_re = Regex::new(r#""([^"]*)""#).ok()?;
    Some(
        item_re
            .captures_iter(&body)
            .map(|item| item[1].to_string())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strict_parse() {
        let value: Value = parse_object(r#"{"intent": "medical_inquiry"}"#).unwrap();
        assert_eq!(value["intent"], "medical_inquiry");
    }

    #[test]
    fn test_fenced_and_prose_wrapped() {
        let text = "Here is my analysis:\n```json\n{\"valid\": true, \"issues\": []}\n```\nLet me know if you need more.";
        let value: Value = parse_object(text).unwrap();
        assert_eq!(value["valid"], true);
    }

    #[test]
    fn test_balanced_extraction_with_nested_braces_in_strings() {
        let text = r#"Sure! {"notes": "watch for {unusual} symptoms", "issues": []} hope that helps"#;
        let value: Value = parse_object(text).unwrap();
        assert_eq!(value["notes"], "watch for {unusual} symptoms");
    }

    #[test]
    fn test_truncated_object_is_no_json() {
        let text = r#"{"condition": "flu", "explanation": "patient reports fe"#;
        let result: Result<Value, _> = parse_object(text);
        assert!(matches!(result, Err(ExtractError::NoJsonFound)));
    }

    #[test]
    fn test_array_extraction() {
        let text = "Interactions below:\n[{\"drug_pair\": [\"a\", \"b\"], \"severity\": \"mild\"}]";
        let value: Vec<Value> = parse_array(text).unwrap();
        assert_eq!(value.len(), 1);
        assert_eq!(value[0]["severity"], "mild");
    }

    #[test]
    fn test_empty_array() {
        let value: Vec<Value> = parse_array("[]").unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_string_field_fallback_on_truncated_json() {
        let text = r#"{"condition": "gastritis", "explanation": "stomach lining infl"#;
        assert_eq!(string_field(text, "condition").unwrap(), "gastritis");
        assert!(string_field(text, "explanation").is_some());
        assert!(string_field(text, "severity").is_none());
    }

    #[test]
    fn test_string_list_fallback() {
        let text = r#"{"recommendations": ["rest", "hydrate"], "medications": ["#;
        assert_eq!(
            string_list(text, "recommendations").unwrap(),
            vec!["rest".to_string(), "hydrate".to_string()]
        );
        assert!(string_list(text, "medications").is_none());
    }

    #[test]
    fn test_string_list_empty() {
        let text = r#"{"issues": []}"#;
        assert_eq!(string_list(text, "issues").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_object_preferred_over_preceding_array_noise() {
        let text = r#"options: [1, 2] then {"pick": 2}"#;
        let value: Value = parse_object(text).unwrap();
        assert_eq!(value["pick"], 2);
    }
}
