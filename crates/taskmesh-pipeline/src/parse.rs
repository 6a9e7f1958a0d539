//! Extraction of JSON from model output.
//!
//! Executors backed by language models rarely return bare JSON. The parser
//! accepts, in order:
//! - raw JSON text
//! - the body of a fenced code block (```` ```json ... ``` ````)
//! - the body of a `<JSON>...</JSON>` tag

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::CompositionError;

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"(?si)```(?:json)?\s*(.*?)\s*```").expect("Invalid regex pattern")
});

static TAGGED: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)<JSON>\s*(.*?)\s*</JSON>").expect("Invalid regex pattern"));

/// Parse JSON out of a model's text output.
pub fn parse_json(text: &str) -> Result<Value, CompositionError> {
  let trimmed = text.trim();
  if let Ok(value) = serde_json::from_str(trimmed) {
    return Ok(value);
  }

  for pattern in [&*FENCED, &*TAGGED] {
    if let Some(body) = pattern.captures(trimmed).and_then(|c| c.get(1)) {
      return serde_json::from_str(body.as_str()).map_err(|e| CompositionError::InvalidJson {
        message: format!("{} in {:?}", e, body.as_str()),
      });
    }
  }

  Err(CompositionError::InvalidJson {
    message: format!("no JSON found in {:?}", truncate(trimmed, 80)),
  })
}

/// Structured view of an output value: strings are parsed as JSON when they
/// contain it, everything else is returned as is.
pub fn structured(value: &Value) -> Value {
  match value {
    Value::String(text) => parse_json(text).unwrap_or_else(|_| value.clone()),
    other => other.clone(),
  }
}

fn truncate(text: &str, max: usize) -> &str {
  match text.char_indices().nth(max) {
    Some((idx, _)) => &text[..idx],
    None => text,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_raw_json() {
    assert_eq!(parse_json(r#" ["a", "b"] "#).unwrap(), json!(["a", "b"]));
  }

  #[test]
  fn test_fenced_block() {
    let text = "Here you go:\n```json\n{\"topic\": \"rust\"}\n```\nEnjoy.";
    assert_eq!(parse_json(text).unwrap(), json!({ "topic": "rust" }));
  }

  #[test]
  fn test_fenced_block_without_language() {
    let text = "```\n[1, 2, 3]\n```";
    assert_eq!(parse_json(text).unwrap(), json!([1, 2, 3]));
  }

  #[test]
  fn test_tagged_block() {
    let text = "<JSON>\n[\"x\"]\n</JSON>";
    assert_eq!(parse_json(text).unwrap(), json!(["x"]));
  }

  #[test]
  fn test_plain_text_is_invalid() {
    let err = parse_json("just some words").unwrap_err();
    assert!(matches!(err, CompositionError::InvalidJson { .. }));
  }

  #[test]
  fn test_structured_keeps_plain_strings() {
    assert_eq!(structured(&json!("hello")), json!("hello"));
    assert_eq!(structured(&json!("[1]")), json!([1]));
    assert_eq!(structured(&json!({ "a": 1 })), json!({ "a": 1 }));
  }
}
