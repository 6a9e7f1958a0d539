use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Named executor groups and executor capabilities.
///
/// A group name used as an accepted executor tag expands to the listed
/// executor ids, e.g. `"openai": ["gpt-4o", "gpt-4o-mini"]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorCatalogDef {
  pub groups: HashMap<String, Vec<String>>,
  /// Executors able to run payloads that rely on function calling.
  pub function_calling: Vec<String>,
}
