//! Tolerant JSON extraction for model output.
//!
//! Models wrap JSON in prose and code fences, drop quotes from keys, and
//! leave trailing commas. Extraction tries fenced blocks first, then the
//! first balanced object; a repair pass fixes the common damage before
//! giving up.

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// Parse a JSON object out of model output.
///
/// Returns [`Error::Parsing`] only when extraction and repair both fail.
pub fn parse_object(text: &str) -> Result<Value> {
    let candidate = extract_json(text);

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let repaired = repair_json(&candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(other) => Err(Error::parsing(
            truncate(text, 500),
            format!("expected a JSON object, got {other}"),
        )),
        Err(e) => Err(Error::parsing(truncate(text, 500), e.to_string())),
    }
}

/// Pull the most likely JSON payload out of surrounding text.
pub(crate) fn extract_json(text: &str) -> String {
    // Fenced ```json blocks first, then anonymous fences.
    for pattern in [r"```json\s*([\s\S]*?)\s*```", r"```\s*([\s\S]*?)\s*```"] {
        if let Ok(re) = Regex::new(pattern) {
            let mut best: Option<&str> = None;
            for cap in re.captures_iter(text) {
                if let Some(m) = cap.get(1) {
                    if best.is_none_or(|b| m.as_str().len() > b.len()) {
                        best = Some(m.as_str());
                    }
                }
            }
            if let Some(block) = best {
                return block.trim().to_owned();
            }
        }
    }

    // First balanced top-level object.
    if let Some(block) = balanced_object(text) {
        return block.to_owned();
    }

    text.trim().to_owned()
}

/// Find the first balanced `{...}` region, respecting strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fix the common classes of malformed model JSON.
///
/// Applies, in order: single-quote normalization, unquoted-key repair, and
/// trailing-comma removal.
pub(crate) fn repair_json(text: &str) -> String {
    let mut fixed = text.replace('\'', "\"");

    if let Ok(re) = Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#) {
        fixed = re.replace_all(&fixed, "$1\"$2\":").into_owned();
    }

    if let Ok(re) = Regex::new(r",\s*([}\]])") {
        fixed = re.replace_all(&fixed, "$1").into_owned();
    }

    fixed
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_json() {
        let value = parse_object(r#"{"goal": "x", "steps": []}"#).expect("parse");
        assert_eq!(value["goal"], "x");
    }

    #[test]
    fn parses_fenced_json() {
        let text = "Here is the plan:\n```json\n{\"goal\": \"y\"}\n```\nDone.";
        let value = parse_object(text).expect("parse");
        assert_eq!(value["goal"], "y");
    }

    #[test]
    fn parses_anonymous_fence() {
        let text = "```\n{\"goal\": \"z\"}\n```";
        let value = parse_object(text).expect("parse");
        assert_eq!(value["goal"], "z");
    }

    #[test]
    fn extracts_embedded_object() {
        let text = "Sure! {\"goal\": \"embedded\", \"steps\": [{\"id\": \"s1\"}]} hope that helps";
        let value = parse_object(text).expect("parse");
        assert_eq!(value["steps"][0]["id"], "s1");
    }

    #[test]
    fn repairs_trailing_commas() {
        let value = parse_object(r#"{"goal": "x", "steps": [1, 2,],}"#).expect("parse");
        assert_eq!(value["steps"], json!([1, 2]));
    }

    #[test]
    fn repairs_single_quotes_and_bare_keys() {
        let value = parse_object(r"{goal: 'quoted', steps: []}").expect("parse");
        assert_eq!(value["goal"], "quoted");
    }

    #[test]
    fn braces_inside_strings_do_not_break_balance() {
        let text = r#"note {"goal": "has } brace", "steps": []} end"#;
        let value = parse_object(text).expect("parse");
        assert_eq!(value["goal"], "has } brace");
    }

    #[test]
    fn hopeless_input_is_an_error() {
        assert!(parse_object("no json here at all").is_err());
    }

    #[test]
    fn non_object_is_an_error() {
        assert!(parse_object("[1, 2, 3]").is_err());
    }
}
