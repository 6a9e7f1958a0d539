use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;

/// Named values consumed by a step's payload constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskInput(Map<String, Value>);

impl TaskInput {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.0.insert(key.into(), value.into());
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &String> {
    self.0.keys()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn as_map(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_value(self) -> Value {
    Value::Object(self.0)
  }

  /// Convert a JSON value into an input. Only objects are accepted.
  pub fn from_value(value: Value) -> Result<Self, TaskError> {
    match value {
      Value::Object(map) => Ok(Self(map)),
      other => Err(TaskError::InvalidInput {
        message: format!("expected a JSON object, got {}", kind_of(&other)),
      }),
    }
  }
}

impl From<Map<String, Value>> for TaskInput {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

impl FromIterator<(String, Value)> for TaskInput {
  fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_builder_and_accessors() {
    let input = TaskInput::new().with("topic", "rust").with("count", 3);

    assert_eq!(input.len(), 2);
    assert_eq!(input.get("topic"), Some(&json!("rust")));
    assert!(input.contains_key("count"));
    assert_eq!(input.into_value(), json!({ "topic": "rust", "count": 3 }));
  }

  #[test]
  fn test_from_value_rejects_non_objects() {
    let err = TaskInput::from_value(json!(["a", "b"])).unwrap_err();
    assert!(err.to_string().contains("an array"));
  }

  #[test]
  fn test_serializes_as_plain_object() {
    let input = TaskInput::new().with("text", "hello");
    assert_eq!(serde_json::to_string(&input).unwrap(), r#"{"text":"hello"}"#);
  }
}
