//! Composition operators.
//!
//! An operator maps the outputs of one stage to the inputs of the next. Only
//! successful task outputs take part; they are visited in original input
//! order, never in completion order.
//!
//! | Operator    | Mapping                  |
//! |-------------|--------------------------|
//! | `forward`   | each output → one input  |
//! | `scatter`   | list output → one input per item |
//! | `broadcast` | first output → `n` copies |
//! | `aggregate` | all outputs → one input holding a list |
//! | custom      | caller-supplied function |

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use taskmesh_config::{OperatorDef, OperatorKind};
use taskmesh_task::TaskInput;

use crate::error::CompositionError;
use crate::parse::{parse_json, structured};
use crate::step::StepExecutionState;

/// Key used when the next step does not name a single input key.
pub const DEFAULT_KEY: &str = "result";

type Composer =
  dyn Fn(&StepExecutionState) -> Result<Vec<TaskInput>, CompositionError> + Send + Sync;

/// How a stage's outputs become the next stage's inputs.
#[derive(Clone, Default)]
pub enum CompositionOperator {
  #[default]
  Forward,
  Scatter,
  Broadcast {
    n: usize,
  },
  Aggregate,
  Custom(Arc<Composer>),
}

impl CompositionOperator {
  pub fn custom<F>(compose: F) -> Self
  where
    F: Fn(&StepExecutionState) -> Result<Vec<TaskInput>, CompositionError> + Send + Sync + 'static,
  {
    Self::Custom(Arc::new(compose))
  }

  pub fn from_def(def: &OperatorDef) -> Self {
    match def.kind {
      OperatorKind::Forward => Self::Forward,
      OperatorKind::Scatter => Self::Scatter,
      OperatorKind::Broadcast => Self::Broadcast {
        n: def.n.unwrap_or(1),
      },
      OperatorKind::Aggregate => Self::Aggregate,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Forward => "forward",
      Self::Scatter => "scatter",
      Self::Broadcast { .. } => "broadcast",
      Self::Aggregate => "aggregate",
      Self::Custom(_) => "custom",
    }
  }

  /// Whether the operator writes a single value under the next step's key.
  pub fn needs_single_key(&self) -> bool {
    matches!(
      self,
      Self::Scatter | Self::Broadcast { .. } | Self::Aggregate
    )
  }

  /// Compose `values`, the stage's successful outputs in input order.
  ///
  /// `next_keys` are the input keys of the step that consumes the result.
  pub fn compose(
    &self,
    state: &StepExecutionState,
    values: Vec<Value>,
    next_keys: &[String],
  ) -> Result<Vec<TaskInput>, CompositionError> {
    let inputs = match self {
      Self::Forward => values
        .into_iter()
        .map(|value| keyed(value, next_keys))
        .collect(),
      Self::Scatter => {
        let mut inputs = Vec::new();
        for value in &values {
          for item in as_sequence(value)? {
            inputs.push(keyed(item, next_keys));
          }
        }
        inputs
      }
      Self::Broadcast { n } => {
        let first = values.first().ok_or(CompositionError::NoOutput)?;
        let input = keyed(structured(first), next_keys);
        vec![input; *n]
      }
      Self::Aggregate => {
        let items = values.iter().map(structured).collect::<Vec<_>>();
        vec![keyed(Value::Array(items), next_keys)]
      }
      Self::Custom(compose) => compose(state)?,
    };

    if inputs.is_empty() {
      return Err(CompositionError::NoOutput);
    }
    Ok(inputs)
  }
}

impl fmt::Debug for CompositionOperator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Broadcast { n } => write!(f, "Broadcast {{ n: {} }}", n),
      other => f.write_str(other.name()),
    }
  }
}

/// Wrap a value as the input of a step taking `keys`.
fn keyed(value: Value, keys: &[String]) -> TaskInput {
  match (keys, value) {
    ([key], value) => TaskInput::new().with(key.clone(), value),
    (_, Value::Object(map)) => TaskInput::from(map),
    (_, value) => TaskInput::new().with(DEFAULT_KEY, value),
  }
}

fn as_sequence(value: &Value) -> Result<Vec<Value>, CompositionError> {
  let parsed = match value {
    Value::String(text) => parse_json(text)?,
    other => other.clone(),
  };
  match parsed {
    Value::Array(items) => Ok(items),
    other => Err(CompositionError::NotASequence {
      value: other.to_string(),
    }),
  }
}
